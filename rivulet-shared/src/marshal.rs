use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize>;

    fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

pub trait Unmarshal: MarshalSize + Sized {
    fn unmarshal(buf: &mut impl Buf) -> Result<Self>;
}

/// Fails with `BufferShort` unless `buf` has at least `need` bytes left.
pub fn require(buf: &impl Buf, need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(Error::BufferShort {
            need,
            left: buf.remaining(),
        });
    }
    Ok(())
}
