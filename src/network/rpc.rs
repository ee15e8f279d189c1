//! RPC message types for inter-node communication.
//!
//! All node roles share one request/reply pair on the wire; each role
//! serves the subset of operations its contract defines and answers
//! `Reply::Err` for the rest. Register values travel as 32-bit signed
//! integers.

use tisnet_derive::{BinaryCodec, Error};

/// Commands accepted by the node RPC services.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub enum Request {
    /// Start the node's run phase.
    Run,
    /// Stop the run phase, aborting blocked operations.
    Pause,
    /// Stop and clear node state.
    Reset,
    /// Reset the target program node and install a new program.
    Load { program: String },
    /// Deliver a value into a program node's mailbox R0..R3.
    ///
    /// Completes only once the mailbox has accepted the value, giving
    /// pairwise rendezvous between sender and receiver.
    Send { register: u8, value: i32 },
    /// Push a value onto a stack node.
    Push { value: i32 },
    /// Pop a value from a stack node; blocks while the stack is empty.
    Pop,
    /// Take the next external input from the master; blocks until one
    /// is available.
    GetInput,
    /// Hand an output value to the master.
    SendOutput { value: i32 },
}

/// Replies to [`Request`]s.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub enum Reply {
    /// The operation completed.
    Ok,
    /// The operation completed and produced a value (`Pop`, `GetInput`).
    Value { value: i32 },
    /// The operation failed; the message carries the remote diagnostic.
    Err { message: String },
}

/// Errors that can occur when calling a peer node.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Could not open a connection to the peer.
    #[error("failed to connect to {0}")]
    Connect(String),
    /// The connection broke mid-exchange.
    #[error("transport failure talking to {0}")]
    Io(String),
    /// The peer's reply did not decode.
    #[error("malformed frame from {0}")]
    BadFrame(String),
    /// The peer replied with a different shape than the call expects.
    #[error("unexpected reply from {0}")]
    UnexpectedReply(String),
    /// The peer reported a failure.
    #[error("{0}")]
    Remote(String),
    /// The caller's cancellation token fired mid-call.
    #[error("rpc cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn request_roundtrip() {
        let requests = vec![
            Request::Run,
            Request::Pause,
            Request::Reset,
            Request::Load {
                program: "IN ACC\nOUT ACC".to_string(),
            },
            Request::Send {
                register: 3,
                value: -7,
            },
            Request::Push { value: i32::MIN },
            Request::Pop,
            Request::GetInput,
            Request::SendOutput { value: i32::MAX },
        ];

        for request in requests {
            let encoded = request.to_bytes();
            let decoded = Request::from_bytes(&encoded).expect("deserialization failed");
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn reply_roundtrip() {
        let replies = vec![
            Reply::Ok,
            Reply::Value { value: -42 },
            Reply::Err {
                message: "register 9 is not a valid mailbox".to_string(),
            },
        ];

        for reply in replies {
            let encoded = reply.to_bytes();
            let decoded = Reply::from_bytes(&encoded).expect("deserialization failed");
            assert_eq!(decoded, reply);
        }
    }

    #[test]
    fn request_discriminants_are_stable() {
        // First byte is the discriminant, in declaration order.
        assert_eq!(Request::Run.to_bytes()[0], 0);
        assert_eq!(Request::Pause.to_bytes()[0], 1);
        assert_eq!(Request::Reset.to_bytes()[0], 2);
        assert_eq!(Request::Pop.to_bytes()[0], 6);
        assert_eq!(Request::GetInput.to_bytes()[0], 7);
    }

    #[test]
    fn unknown_discriminant_fails_decode() {
        assert!(Request::from_bytes(&[0xFF]).is_err());
    }
}
