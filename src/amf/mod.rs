//! AMF (Action Message Format) support
//!
//! AMF0 is Adobe's binary serialization format used in RTMP for encoding
//! command parameters and metadata. The publisher only ever speaks AMF0:
//! commands (`connect`, `createStream`, `publish`, ...) and data messages
//! (`@setDataFrame onMetaData`) are AMF0 on the wire.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
