//! A `Box<[u8; LEN]>` wrapper with a custom `bincode::Decode` implementation that deserializes
//! directly into heap memory.
//!
//! The implementation that `#[derive(Decode)]` generates for `Box<[u8; LEN]>` deserializes into
//! stack memory and then moves to the heap. The Saturn carries several large byte memories (the
//! two 512 KiB VRAM banks, the 256 KiB sprite framebuffers, the 1 MiB work RAM banks), and
//! stack-decoding arrays of that size blows the stack on some platforms.

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Encode)]
pub struct BoxedByteArray<const LEN: usize>(Box<[u8; LEN]>);

impl<const LEN: usize> BoxedByteArray<LEN> {
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new() -> Self {
        Self(new_boxed_array())
    }
}

impl<const LEN: usize> Default for BoxedByteArray<LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LEN: usize> From<Box<[u8; LEN]>> for BoxedByteArray<LEN> {
    fn from(value: Box<[u8; LEN]>) -> Self {
        Self(value)
    }
}

impl<const LEN: usize> Deref for BoxedByteArray<LEN> {
    type Target = Box<[u8; LEN]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const LEN: usize> DerefMut for BoxedByteArray<LEN> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn new_boxed_array<const LEN: usize>() -> Box<[u8; LEN]> {
    vec![0; LEN].into_boxed_slice().try_into().unwrap()
}

// Both decode flavors fill a fresh heap allocation straight from the reader
fn decode_into_heap<const LEN: usize>(
    reader: &mut impl Reader,
) -> Result<BoxedByteArray<LEN>, DecodeError> {
    let mut array = new_boxed_array::<LEN>();
    reader.read(array.as_mut())?;
    Ok(BoxedByteArray(array))
}

impl<const LEN: usize, Context> Decode<Context> for BoxedByteArray<LEN> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_into_heap(decoder.reader())
    }
}

impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for BoxedByteArray<LEN> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        decode_into_heap(decoder.reader())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_through_heap_memory() {
        let mut array = BoxedByteArray::<{ 64 * 1024 }>::new();
        array[0] = 0xAB;
        array[0xFFFF] = 0xCD;

        let encoded = bincode::encode_to_vec(&array, bincode::config::standard()).unwrap();
        let (decoded, _): (BoxedByteArray<{ 64 * 1024 }>, _) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();

        assert_eq!(decoded[0], 0xAB);
        assert_eq!(decoded[0xFFFF], 0xCD);
        assert_eq!(decoded[1], 0);
    }
}
