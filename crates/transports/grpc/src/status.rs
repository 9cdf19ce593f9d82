//! Mapping between wire-level statuses and the SDK error taxonomy.

use tonic::Code;
use ydbx_core::{Error, TransportKind};

use crate::pb::{join_issues, IssueMessage, StatusCode};

/// Classify a gRPC transport status into the SDK taxonomy.
pub fn from_grpc_status(status: &tonic::Status) -> Error {
    let kind = match status.code() {
        Code::Unavailable => TransportKind::Unavailable,
        Code::Cancelled => TransportKind::Cancelled,
        Code::DeadlineExceeded => TransportKind::TimedOut,
        _ => TransportKind::Broken,
    };
    Error::Transport {
        kind,
        message: format!("{}: {}", status.code(), status.message()),
    }
}

/// Turn a server operation status into `Ok(())` or a classified error.
pub fn check_server_status(status: i32, issues: &[IssueMessage]) -> Result<(), Error> {
    let code = match StatusCode::try_from(status) {
        Ok(code) => code,
        Err(_) => {
            return Err(Error::Protocol(format!("unknown status code {status}")));
        }
    };
    let message = join_issues(issues);
    match code {
        StatusCode::Success => Ok(()),
        StatusCode::SessionExpired => Err(Error::SessionExpired),
        StatusCode::BadSession => Err(Error::BadSession),
        StatusCode::Overloaded
        | StatusCode::Aborted
        | StatusCode::Unavailable
        | StatusCode::SessionBusy => Err(Error::RetryableServer {
            status: code.as_str_name().to_owned(),
            message,
        }),
        StatusCode::Unspecified => Err(Error::Protocol("response carried no status".into())),
        _ => Err(Error::NonRetryableServer {
            status: code.as_str_name().to_owned(),
            message,
        }),
    }
}
