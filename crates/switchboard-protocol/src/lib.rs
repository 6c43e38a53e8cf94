//! # switchboard-protocol
//!
//! Wire format for the Switchboard message hub.
//!
//! Every message exchanged with a peer, in either direction, is an
//! [`Envelope`]: a `type` discriminator plus an opaque `data` payload,
//! carried as a JSON text frame.
//!
//! ```json
//! {"type": "ping", "data": null}
//! ```
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::new("chat", serde_json::json!({"text": "hi"}));
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(encoded.as_bytes()).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::Envelope;
