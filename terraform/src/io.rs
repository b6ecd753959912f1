//! This module provides read and write extension traits for the big endian types used
//! by the NBT state format.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{self, Read, Write};


/// Extension trait with NBT-specific read methods.
pub trait ReadNbtExt: Read {

    #[inline]
    fn read_nbt_byte(&mut self) -> io::Result<i8> {
        ReadBytesExt::read_i8(self)
    }

    #[inline]
    fn read_nbt_short(&mut self) -> io::Result<i16> {
        ReadBytesExt::read_i16::<BE>(self)
    }

    #[inline]
    fn read_nbt_int(&mut self) -> io::Result<i32> {
        ReadBytesExt::read_i32::<BE>(self)
    }

    #[inline]
    fn read_nbt_long(&mut self) -> io::Result<i64> {
        ReadBytesExt::read_i64::<BE>(self)
    }

    #[inline]
    fn read_nbt_float(&mut self) -> io::Result<f32> {
        ReadBytesExt::read_f32::<BE>(self)
    }

    #[inline]
    fn read_nbt_double(&mut self) -> io::Result<f64> {
        ReadBytesExt::read_f64::<BE>(self)
    }

    /// Read a string prefixed by its unsigned 16 bit byte length, this is the modified
    /// UTF-8 used for NBT keys and strings, only plain UTF-8 is accepted here.
    fn read_nbt_string(&mut self) -> io::Result<String> {

        let len = self.read_u16::<BE>()?;
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;

        String::from_utf8(buf).map_err(|_| new_invalid_data_err("invalid utf-8 string"))

    }

}

/// Extension trait with NBT-specific write methods.
pub trait WriteNbtExt: Write {

    #[inline]
    fn write_nbt_byte(&mut self, b: i8) -> io::Result<()> {
        WriteBytesExt::write_i8(self, b)
    }

    #[inline]
    fn write_nbt_short(&mut self, s: i16) -> io::Result<()> {
        WriteBytesExt::write_i16::<BE>(self, s)
    }

    #[inline]
    fn write_nbt_int(&mut self, i: i32) -> io::Result<()> {
        WriteBytesExt::write_i32::<BE>(self, i)
    }

    #[inline]
    fn write_nbt_long(&mut self, l: i64) -> io::Result<()> {
        WriteBytesExt::write_i64::<BE>(self, l)
    }

    #[inline]
    fn write_nbt_float(&mut self, f: f32) -> io::Result<()> {
        WriteBytesExt::write_f32::<BE>(self, f)
    }

    #[inline]
    fn write_nbt_double(&mut self, d: f64) -> io::Result<()> {
        WriteBytesExt::write_f64::<BE>(self, d)
    }

    fn write_nbt_string(&mut self, s: &str) -> io::Result<()> {

        if s.len() > u16::MAX as usize {
            return Err(new_invalid_data_err("string too big"));
        }

        self.write_u16::<BE>(s.len() as u16)?;
        self.write_all(s.as_bytes())

    }

}

impl<R: Read> ReadNbtExt for R {}
impl<W: Write> WriteNbtExt for W {}


/// Return an invalid data io error with specific message.
fn new_invalid_data_err(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
