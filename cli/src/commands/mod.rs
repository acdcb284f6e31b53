pub(crate) mod process;
pub(crate) mod scan;
pub(crate) mod validate;

pub(crate) use process::command_process;
pub(crate) use scan::command_scan;
pub(crate) use validate::command_validate;
