//! HTTP/1.1 wire handling: headers, connection device, output filters,
//! multipart decoding, and the variant value encoding used by remote
//! objects.

pub mod device;
pub mod filter;
pub mod header;
pub mod multipart;
pub mod variant;

pub use device::{ConnectionMode, HttpConnection};
pub use filter::{BufferFilter, MultipartEncodeFilter, OutputFilter};
pub use header::{FieldMap, MimeHeader, RequestHeader, ResponseHeader};
pub use multipart::{BufferedRead, MultipartDecoder};
pub use variant::{Variant, VariantKind};
