use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, Reading, BATCH_HEADER_SIZE, READING_WIRE_SIZE, SYNC_WIRE_SIZE};
use super::message::{BatchPacket, SyncPacket};

/// Codec for the one-byte bootstrap counter packet
#[derive(Clone, Copy, Default)]
pub struct SyncCodec;

impl SyncCodec {
    /// Creates a new sync codec
    pub fn new() -> Self {
        SyncCodec
    }
}

impl Decoder for SyncCodec {
    type Item = SyncPacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SYNC_WIRE_SIZE {
            return Ok(None);
        }

        let packet = bincode::deserialize(&src[..SYNC_WIRE_SIZE])
            .map_err(|e| Error::protocol(format!("Failed to deserialize sync packet: {}", e)))?;
        src.advance(SYNC_WIRE_SIZE);

        Ok(Some(packet))
    }
}

impl Encoder<SyncPacket> for SyncCodec {
    type Error = Error;

    fn encode(&mut self, item: SyncPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(SYNC_WIRE_SIZE);
        bincode::serialize_into((&mut *dst).writer(), &item)
            .map_err(|e| Error::protocol(format!("Failed to serialize sync packet: {}", e)))
    }
}

/// Codec for batch packets: a `count` byte followed by `count` fixed-width readings
#[derive(Clone, Copy)]
pub struct BatchCodec {
    capacity: usize,
}

impl BatchCodec {
    /// Creates a codec for batches of at most `capacity` readings
    pub fn new(capacity: usize) -> Self {
        BatchCodec { capacity }
    }

    /// Encoded size of a batch holding `count` readings
    pub fn encoded_len(count: usize) -> usize {
        BATCH_HEADER_SIZE + count * READING_WIRE_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Decoder for BatchCodec {
    type Item = BatchPacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < BATCH_HEADER_SIZE {
            return Ok(None);
        }

        let count = src[0] as usize;
        if count > self.capacity {
            return Err(Error::protocol(format!(
                "Batch count {} exceeds capacity {}",
                count, self.capacity
            )));
        }

        let length = Self::encoded_len(count);
        if src.len() < length {
            // Need more data to read the full batch
            return Ok(None);
        }

        src.advance(BATCH_HEADER_SIZE);
        let mut batch = BatchPacket::with_capacity(self.capacity);
        for _ in 0..count {
            let reading: Reading = bincode::deserialize(&src[..READING_WIRE_SIZE])
                .map_err(|e| Error::protocol(format!("Failed to deserialize reading: {}", e)))?;
            src.advance(READING_WIRE_SIZE);
            batch
                .push(reading)
                .map_err(|_| Error::protocol("Batch overflow while decoding"))?;
        }

        Ok(Some(batch))
    }
}

impl<'a> Encoder<&'a BatchPacket> for BatchCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a BatchPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.count() > self.capacity {
            return Err(Error::protocol(format!(
                "Batch of {} readings exceeds capacity {}",
                item.count(),
                self.capacity
            )));
        }

        dst.reserve(Self::encoded_len(item.count()));
        dst.put_u8(item.count() as u8);
        for reading in item.readings() {
            bincode::serialize_into((&mut *dst).writer(), reading)
                .map_err(|e| Error::protocol(format!("Failed to serialize reading: {}", e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;

    #[test]
    fn test_codec_sync_packet() {
        let mut codec = SyncCodec::new();
        let mut bytes = BytesMut::new();

        codec.encode(SyncPacket { round: 7 }, &mut bytes).unwrap();
        assert_eq!(&bytes[..], &[7]);

        let decoded = codec.decode(&mut bytes).unwrap();
        assert_eq!(decoded, Some(SyncPacket { round: 7 }));
        assert!(bytes.is_empty());
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_codec_batch_layout() {
        let mut codec = BatchCodec::new(5);
        let mut bytes = BytesMut::new();

        let (batch, _) = BatchPacket::from_readings(
            5,
            vec![
                Reading::new(NodeId(10), 1, 300),
                Reading::new(NodeId(15), 9, 2),
            ],
        );
        codec.encode(&batch, &mut bytes).unwrap();

        assert_eq!(bytes.len(), BatchCodec::encoded_len(2));
        assert_eq!(&bytes[..6], &[2, 10, 0, 1, 0x2C, 0x01]);

        let decoded = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(decoded.readings(), batch.readings());
    }

    #[test]
    fn test_codec_empty_batch() {
        let mut codec = BatchCodec::new(5);
        let mut bytes = BytesMut::new();

        codec.encode(&BatchPacket::with_capacity(5), &mut bytes).unwrap();
        assert_eq!(&bytes[..], &[0]);

        let decoded = codec.decode(&mut bytes).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_codec_truncated_batch() {
        let mut codec = BatchCodec::new(5);
        let mut bytes = BytesMut::from(&[2u8, 10, 0, 1, 0x2C, 0x01, 15][..]);
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_codec_rejects_oversized_count() {
        let mut codec = BatchCodec::new(4);
        let mut bytes = BytesMut::from(&[5u8][..]);
        assert!(matches!(codec.decode(&mut bytes), Err(Error::Protocol(_))));

        let (batch, _) = BatchPacket::from_readings(
            5,
            (1..=5).map(|seq| Reading::new(NodeId(1), seq, 0)),
        );
        let mut out = BytesMut::new();
        assert!(codec.encode(&batch, &mut out).is_err());
    }

    #[test]
    fn test_largest_batch_fits_payload() {
        let capacity = crate::core::max_batch_capacity(100);
        assert_eq!(capacity, 19);
        assert!(BatchCodec::encoded_len(capacity) <= 100);
    }
}
