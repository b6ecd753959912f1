//! NBT format serialization and deserialization.
//!
//! This is the tag format used to persist the global terraform state, it supports the
//! classic tag types plus the int and long array tags that are required to store the
//! revision store compactly.

use std::io::{self, Read, Write};
use std::collections::BTreeMap;
use std::fmt;

use crate::io::{ReadNbtExt, WriteNbtExt};


const NBT_BYTE       : i8 = 1;
const NBT_SHORT      : i8 = 2;
const NBT_INT        : i8 = 3;
const NBT_LONG       : i8 = 4;
const NBT_FLOAT      : i8 = 5;
const NBT_DOUBLE     : i8 = 6;
const NBT_BYTE_ARRAY : i8 = 7;
const NBT_STRING     : i8 = 8;
const NBT_LIST       : i8 = 9;
const NBT_COMPOUND   : i8 = 10;
const NBT_INT_ARRAY  : i8 = 11;
const NBT_LONG_ARRAY : i8 = 12;


/// A generic NBT tag. Lists are typed by their element so that a list can never hold
/// heterogeneous tags.
#[derive(Clone, PartialEq)]
pub enum Nbt {
    // Primitive tags.
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    // List tags.
    ListInt(Vec<i32>),
    ListLong(Vec<i64>),
    ListString(Vec<String>),
    ListCompound(Vec<NbtCompound>),
    // Compound tag.
    Compound(NbtCompound),
}

/// An abstract NBT compound type that hides the internal implementation of the mapping.
#[derive(Clone, PartialEq, Default)]
pub struct NbtCompound {
    inner: BTreeMap<String, Nbt>,
}


/// Deserialize a NBT tag from a reader.
pub fn from_reader(mut reader: impl Read) -> Result<Nbt, NbtError> {

    let type_id = reader.read_nbt_byte()?;
    if type_id == 0 {
        // We should not get a end tag directly.
        return Err(NbtError::IllegalTagType);
    }

    let _key = reader.read_nbt_string()?;
    from_reader_with_type(&mut reader, type_id)

}

/// Internal function to read a NBT tag of a specific type.
fn from_reader_with_type(reader: &mut impl Read, type_id: i8) -> Result<Nbt, NbtError> {
    Ok(match type_id {
        NBT_BYTE => Nbt::Byte(reader.read_nbt_byte()?),
        NBT_SHORT => Nbt::Short(reader.read_nbt_short()?),
        NBT_INT => Nbt::Int(reader.read_nbt_int()?),
        NBT_LONG => Nbt::Long(reader.read_nbt_long()?),
        NBT_FLOAT => Nbt::Float(reader.read_nbt_float()?),
        NBT_DOUBLE => Nbt::Double(reader.read_nbt_double()?),
        NBT_BYTE_ARRAY => Nbt::ByteArray(byte_array_from_reader(reader)?),
        NBT_STRING => Nbt::String(reader.read_nbt_string()?),
        NBT_INT_ARRAY => {
            let len = len_from_reader(reader)?;
            Nbt::IntArray(list_from_reader(len, || reader.read_nbt_int())?)
        }
        NBT_LONG_ARRAY => {
            let len = len_from_reader(reader)?;
            Nbt::LongArray(list_from_reader(len, || reader.read_nbt_long())?)
        }
        NBT_LIST => {

            // NOTE: A list can contain a single type.
            let type_id = reader.read_nbt_byte()?;
            let len = len_from_reader(reader)?;

            match type_id {
                // An empty list may be written with the end tag as element type.
                0 if len == 0 => Nbt::ListCompound(Vec::new()),
                NBT_INT => Nbt::ListInt(list_from_reader(len, || reader.read_nbt_int())?),
                NBT_LONG => Nbt::ListLong(list_from_reader(len, || reader.read_nbt_long())?),
                NBT_STRING => Nbt::ListString(list_from_reader(len, || reader.read_nbt_string())?),
                NBT_COMPOUND => Nbt::ListCompound(list_from_reader(len, || compound_from_reader(reader))?),
                _ => return Err(NbtError::IllegalTagType),
            }

        }
        NBT_COMPOUND => Nbt::Compound(compound_from_reader(reader)?),
        _ => return Err(NbtError::IllegalTagType),
    })
}

fn len_from_reader(reader: &mut impl Read) -> Result<usize, NbtError> {
    reader.read_nbt_int()?.try_into().map_err(|_| NbtError::IllegalLength)
}

fn list_from_reader<T, E>(len: usize, mut func: impl FnMut() -> Result<T, E>) -> Result<Vec<T>, NbtError>
where
    NbtError: From<E>,
{
    // The length comes from untrusted data, don't preallocate more than a page.
    let mut list = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        list.push(func()?);
    }
    Ok(list)
}

fn byte_array_from_reader(reader: &mut impl Read) -> Result<Vec<u8>, NbtError> {
    let len = len_from_reader(reader)?;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(NbtError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}

fn compound_from_reader(reader: &mut impl Read) -> Result<NbtCompound, NbtError> {

    let mut map = BTreeMap::new();

    loop {

        let type_id = reader.read_nbt_byte()?;
        if type_id == 0 {
            break Ok(NbtCompound { inner: map });  // End tag.
        }

        let key = reader.read_nbt_string()?;
        map.insert(key, from_reader_with_type(reader, type_id)?);

    }

}

/// Serialize a NBT tag into a writer.
pub fn to_writer(mut writer: impl Write, tag: &Nbt) -> Result<(), NbtError> {
    writer.write_nbt_byte(get_nbt_type_id(tag))?;
    writer.write_nbt_string("")?; // Root tag has empty key.
    to_writer_raw(&mut writer, tag)
}

/// Internal function to write a NBT tag content.
fn to_writer_raw(writer: &mut impl Write, tag: &Nbt) -> Result<(), NbtError> {

    #[inline]
    fn len_to_writer(writer: &mut impl Write, len: usize) -> Result<(), NbtError> {
        let len: i32 = len.try_into().map_err(|_| NbtError::IllegalLength)?;
        writer.write_nbt_int(len)?;
        Ok(())
    }

    #[inline]
    fn list_to_writer<W, T>(writer: &mut W, list: &[T], type_id: Option<i8>, mut func: impl FnMut(&mut W, &T) -> Result<(), NbtError>) -> Result<(), NbtError>
    where
        W: Write,
    {
        if let Some(type_id) = type_id {
            writer.write_nbt_byte(type_id)?;
        }
        len_to_writer(writer, list.len())?;
        for item in list {
            func(writer, item)?;
        }
        Ok(())
    }

    match *tag {
        Nbt::Byte(n) => writer.write_nbt_byte(n)?,
        Nbt::Short(n) => writer.write_nbt_short(n)?,
        Nbt::Int(n) => writer.write_nbt_int(n)?,
        Nbt::Long(n) => writer.write_nbt_long(n)?,
        Nbt::Float(n) => writer.write_nbt_float(n)?,
        Nbt::Double(n) => writer.write_nbt_double(n)?,
        Nbt::ByteArray(ref buf) => {
            len_to_writer(writer, buf.len())?;
            writer.write_all(buf)?;
        }
        Nbt::String(ref string) => writer.write_nbt_string(string)?,
        Nbt::IntArray(ref list) => list_to_writer(writer, list, None, |w, &v| Ok(w.write_nbt_int(v)?))?,
        Nbt::LongArray(ref list) => list_to_writer(writer, list, None, |w, &v| Ok(w.write_nbt_long(v)?))?,
        Nbt::ListInt(ref list) => list_to_writer(writer, list, Some(NBT_INT), |w, &v| Ok(w.write_nbt_int(v)?))?,
        Nbt::ListLong(ref list) => list_to_writer(writer, list, Some(NBT_LONG), |w, &v| Ok(w.write_nbt_long(v)?))?,
        Nbt::ListString(ref list) => list_to_writer(writer, list, Some(NBT_STRING), |w, v| Ok(w.write_nbt_string(v)?))?,
        Nbt::ListCompound(ref list) => list_to_writer(writer, list, Some(NBT_COMPOUND), compound_to_writer)?,
        Nbt::Compound(ref compound) => compound_to_writer(writer, compound)?,
    }

    Ok(())

}

fn compound_to_writer(writer: &mut impl Write, compound: &NbtCompound) -> Result<(), NbtError> {

    for (key, tag) in &compound.inner {
        writer.write_nbt_byte(get_nbt_type_id(tag))?;
        writer.write_nbt_string(key)?;
        to_writer_raw(writer, tag)?;
    }

    writer.write_nbt_byte(0)?;
    Ok(())

}

/// Internal function to get the NBT type id of a tag.
fn get_nbt_type_id(tag: &Nbt) -> i8 {
    match tag {
        Nbt::Byte(_) => NBT_BYTE,
        Nbt::Short(_) => NBT_SHORT,
        Nbt::Int(_) => NBT_INT,
        Nbt::Long(_) => NBT_LONG,
        Nbt::Float(_) => NBT_FLOAT,
        Nbt::Double(_) => NBT_DOUBLE,
        Nbt::ByteArray(_) => NBT_BYTE_ARRAY,
        Nbt::String(_) => NBT_STRING,
        Nbt::IntArray(_) => NBT_INT_ARRAY,
        Nbt::LongArray(_) => NBT_LONG_ARRAY,
        Nbt::ListInt(_) |
        Nbt::ListLong(_) |
        Nbt::ListString(_) |
        Nbt::ListCompound(_) => NBT_LIST,
        Nbt::Compound(_) => NBT_COMPOUND,
    }
}


/// Basic methods to interpret a tag as its inner type if possible.
impl Nbt {

    #[inline]
    pub fn as_byte(&self) -> Option<i8> {
        match *self {
            Self::Byte(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Self::Int(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Self::Long(n) => Some(n),
            _ => None
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(string) => Some(string.as_str()),
            _ => None
        }
    }

    #[inline]
    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Self::IntArray(list) => Some(&list[..]),
            _ => None
        }
    }

    #[inline]
    pub fn as_long_array(&self) -> Option<&[i64]> {
        match self {
            Self::LongArray(list) => Some(&list[..]),
            _ => None
        }
    }

    #[inline]
    pub fn as_compound(&self) -> Option<&NbtCompound> {
        match self {
            Self::Compound(comp) => Some(comp),
            _ => None
        }
    }

    pub fn parse(&self) -> NbtParse<'_> {
        NbtParse { inner: self, path: String::new() }
    }

}

/// Basic methods to create and manage keys in a compound.
impl NbtCompound {

    pub fn new() -> Self {
        Self { inner: BTreeMap::new() }
    }

    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, tag: Nbt) {
        self.inner.insert(key.into(), tag);
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Nbt> {
        self.inner.get(key)
    }

    #[inline]
    pub fn get_byte(&self, key: &str) -> Option<i8> {
        self.get(key).and_then(Nbt::as_byte)
    }

    #[inline]
    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Nbt::as_int)
    }

    #[inline]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Nbt::as_long)
    }

    #[inline]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Nbt::as_string)
    }

    #[inline]
    pub fn get_int_array(&self, key: &str) -> Option<&[i32]> {
        self.get(key).and_then(Nbt::as_int_array)
    }

    #[inline]
    pub fn get_long_array(&self, key: &str) -> Option<&[i64]> {
        self.get(key).and_then(Nbt::as_long_array)
    }

    #[inline]
    pub fn get_compound(&self, key: &str) -> Option<&NbtCompound> {
        self.get(key).and_then(Nbt::as_compound)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

}

impl From<NbtCompound> for Nbt {
    #[inline]
    fn from(value: NbtCompound) -> Self {
        Nbt::Compound(value)
    }
}


/// Manual debug implement to shrink the potential huge arrays.
impl fmt::Debug for Nbt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        fn debug_array<T: fmt::Debug>(f: &mut fmt::Formatter<'_>, name: &str, list: &[T]) -> fmt::Result {
            f.debug_tuple(name)
                .field(&format_args!("({}) {:?}...", list.len(), &list[..list.len().min(10)]))
                .finish()
        }

        match self {
            Self::Byte(n) => f.debug_tuple("Byte").field(n).finish(),
            Self::Short(n) => f.debug_tuple("Short").field(n).finish(),
            Self::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Self::Long(n) => f.debug_tuple("Long").field(n).finish(),
            Self::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Self::Double(n) => f.debug_tuple("Double").field(n).finish(),
            Self::ByteArray(buf) => debug_array(f, "ByteArray", buf),
            Self::String(string) => f.debug_tuple("String").field(string).finish(),
            Self::IntArray(list) => debug_array(f, "IntArray", list),
            Self::LongArray(list) => debug_array(f, "LongArray", list),
            Self::ListInt(list) => debug_array(f, "ListInt", list),
            Self::ListLong(list) => debug_array(f, "ListLong", list),
            Self::ListString(list) => f.debug_tuple("ListString").field(list).finish(),
            Self::ListCompound(list) => f.debug_tuple("ListCompound").field(list).finish(),
            Self::Compound(compound) => f.debug_tuple("Compound").field(&compound.inner).finish(),
        }
    }
}

impl fmt::Debug for NbtCompound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(&self.inner).finish()
    }
}


/// Error type returned when reading or writing NBT.
#[derive(thiserror::Error, Debug)]
pub enum NbtError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("Illegal tag type.")]
    IllegalTagType,
    #[error("Illegal decoded length.")]
    IllegalLength,
}


/// Parsing utility structure for anonymous NBT data.
pub struct NbtParse<'nbt> {
    /// Reference to the parsed NBT data.
    inner: &'nbt Nbt,
    /// Current path being parsed, used to return relevant errors.
    path: String,
}

impl<'nbt> NbtParse<'nbt> {

    #[inline]
    fn make_error(self, kind: NbtParseExpected) -> NbtParseError {
        NbtParseError {
            path: self.path,
            expected: kind,
        }
    }

    #[inline]
    pub fn as_int(self) -> Result<i32, NbtParseError> {
        self.inner.as_int().ok_or_else(|| self.make_error(NbtParseExpected::Int))
    }

    #[inline]
    pub fn as_long(self) -> Result<i64, NbtParseError> {
        self.inner.as_long().ok_or_else(|| self.make_error(NbtParseExpected::Long))
    }

    #[inline]
    pub fn as_int_array(self) -> Result<&'nbt [i32], NbtParseError> {
        self.inner.as_int_array().ok_or_else(|| self.make_error(NbtParseExpected::IntArray))
    }

    #[inline]
    pub fn as_long_array(self) -> Result<&'nbt [i64], NbtParseError> {
        self.inner.as_long_array().ok_or_else(|| self.make_error(NbtParseExpected::LongArray))
    }

    #[inline]
    pub fn as_compound(self) -> Result<NbtCompoundParse<'nbt>, NbtParseError> {
        // If successful we wrap the compound into a parse structure to keep the path.
        match self.inner.as_compound() {
            Some(compound) => Ok(NbtCompoundParse {
                inner: compound,
                path: self.path,
            }),
            None => Err(self.make_error(NbtParseExpected::Compound))
        }
    }

}

/// Parsing utility structure for a NBT compound.
pub struct NbtCompoundParse<'nbt> {
    /// Reference to the parsed NBT data.
    inner: &'nbt NbtCompound,
    /// Current path being parsed, used to return relevant errors.
    path: String,
}

impl<'nbt> NbtCompoundParse<'nbt> {

    /// Get a item from its key in this compound.
    pub fn get(&self, key: &str) -> Result<NbtParse<'nbt>, NbtParseError> {
        let path = format!("{}/{key}", self.path);
        match self.inner.get(key) {
            Some(inner) => Ok(NbtParse {
                inner,
                path,
            }),
            None => Err(NbtParseError {
                path,
                expected: NbtParseExpected::Item,
            })
        }
    }

    /// Get an optional item, absent keys are fine but a present key of the wrong type
    /// is still an error.
    pub fn get_opt(&self, key: &str) -> Option<NbtParse<'nbt>> {
        self.get(key).ok()
    }

    #[inline]
    pub fn get_int(&self, key: &str) -> Result<i32, NbtParseError> {
        self.get(key).and_then(NbtParse::as_int)
    }

    #[inline]
    pub fn get_long(&self, key: &str) -> Result<i64, NbtParseError> {
        self.get(key).and_then(NbtParse::as_long)
    }

    #[inline]
    pub fn get_int_array(&self, key: &str) -> Result<&'nbt [i32], NbtParseError> {
        self.get(key).and_then(NbtParse::as_int_array)
    }

    #[inline]
    pub fn get_long_array(&self, key: &str) -> Result<&'nbt [i64], NbtParseError> {
        self.get(key).and_then(NbtParse::as_long_array)
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn inner(&self) -> &'nbt NbtCompound {
        self.inner
    }

}


/// A parsing error as returned by [`NbtParse`] and [`NbtCompoundParse`] wrappers.
#[derive(thiserror::Error, Debug)]
#[error("{path}: expected {expected:?}")]
pub struct NbtParseError {
    /// The path to the failed parsing.
    pub path: String,
    pub expected: NbtParseExpected,
}

/// A type of expected value for a [`NbtParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbtParseExpected {
    /// Expected a compound or list item at this path.
    Item,
    Int,
    Long,
    IntArray,
    LongArray,
    Compound,
}
