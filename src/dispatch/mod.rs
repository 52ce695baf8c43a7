//! Action dispatcher: operation table, authentication, permissions, body codec and the request state machine.

mod auth;
pub mod codec;
mod dispatcher;
mod permission;
mod routes;

pub use auth::{authenticate, Actor, AuthOutcome, Authenticator, Identity, RecordTokenAuthenticator, TokenAuthenticator};
pub use codec::EncodeError;
pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher, DispatcherConfig, Phase, Terminal};
pub use permission::{AllowAny, IsAuthenticated, IsAuthenticatedOrReadOnly, IsOwnerOrReadOnly, IsStaff, Permission};
pub use routes::{OperationEntry, OperationName, OperationTable, Segment};
