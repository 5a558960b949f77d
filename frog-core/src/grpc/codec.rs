//! # Dynamic Message Codec
//!
//! This module implements `tonic::codec::Codec` for [`DynamicMessage`], so `tonic` can transport
//! messages whose layout is only known at run time.
//!
//! ## How it works
//!
//! 1. **Encoder**: serializes the message into the gRPC byte buffer. A dynamic message carries
//!    its own descriptor, so the encoder needs no schema.
//! 2. **Decoder**: merges the raw bytes into a new [`DynamicMessage`] built from the descriptor
//!    the codec was created with.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A codec sending dynamic messages and decoding dynamic messages of one type.
pub struct DynamicCodec {
    /// Schema of the decoded messages.
    decode_desc: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a codec decoding messages of type `decode_desc`.
    ///
    /// On a client this is the response type, on a server the request type.
    pub fn new(decode_desc: MessageDescriptor) -> Self {
        Self { decode_desc }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.decode_desc.clone())
    }
}

/// Responsible for encoding a dynamic message into Protobuf bytes.
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode_raw(dst);
        Ok(())
    }
}

/// Responsible for decoding Protobuf bytes into a dynamic message.
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src).map_err(|e| {
            Status::internal(format!(
                "Failed to decode '{}' from Protobuf bytes: {}",
                self.0.full_name(),
                e
            ))
        })?;

        Ok(Some(msg))
    }
}
