pub mod protocol;
pub mod stream;

pub use protocol::{DEFAULT_COMMAND_PORT, Instruction, ProtocolError, Reply, TestRequest};
pub use stream::StreamHeader;
