//! gRPC error conversions.

use kni_core::error::KniError;
use tonic::Status;

/// Convert a KniError to a gRPC Status.
pub fn kni_error_to_status(err: KniError) -> Status {
    match err {
        KniError::Validation(msg) => Status::invalid_argument(msg),
        KniError::NotFound(msg) => Status::not_found(msg),
        KniError::NotImplemented(msg) => Status::unimplemented(msg),
        KniError::DeadlineExceeded(msg) => Status::deadline_exceeded(msg),
        KniError::Store(msg) => Status::unavailable(msg),
        KniError::Config(msg) => Status::failed_precondition(msg),
        other => Status::internal(other.to_string()),
    }
}
