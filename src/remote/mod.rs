//! Remote objects over HTTP: definitions, the serving side with push
//! channels, and the discovering client.

pub mod channel;
pub mod client;
pub mod object;
pub mod server;

pub use channel::{Channel, PushGuard};
pub use client::{
    ClientError, ListenerToken, RemoteEnum, RemoteFunction, RemoteObjectClient, RemoteProperty,
    RemoteSignal,
};
pub use object::{RemoteObject, ResolveError};
pub use server::{ObjectCore, RemoteObjectServer, SignalSender};
