use byteorder::{LE, WriteBytesExt};

/// Infallible little-endian emission into a byte buffer. `Write` on a
/// `Vec` cannot fail, this trait keeps that fact in one place.
pub(crate) trait EmitLe {
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
}

impl EmitLe for Vec<u8> {
    #[inline]
    fn put_u16(&mut self, v: u16) {
        self.write_u16::<LE>(v).expect("writing to a Vec cannot fail");
    }

    #[inline]
    fn put_u32(&mut self, v: u32) {
        self.write_u32::<LE>(v).expect("writing to a Vec cannot fail");
    }
}
