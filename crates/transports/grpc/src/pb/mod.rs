//! Hand-maintained wire types.
//!
//! These mirror the server's protobuf definitions for the two streaming
//! services the SDK speaks. They are written in the exact shape `prost`
//! codegen would emit so the raw clients can feed them straight into
//! `tonic_prost::ProstCodec`; maintaining them by hand keeps protoc out of
//! the build.

pub mod coordination;
pub mod topic;

/// Server status codes carried in operation envelopes and failure frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unspecified = 0,
    Success = 400000,
    BadRequest = 400010,
    Unauthorized = 400020,
    InternalError = 400030,
    Aborted = 400040,
    Unavailable = 400050,
    Overloaded = 400060,
    SchemeError = 400070,
    GenericError = 400080,
    Timeout = 400090,
    BadSession = 400100,
    PreconditionFailed = 400120,
    AlreadyExists = 400130,
    NotFound = 400140,
    SessionExpired = 400150,
    Cancelled = 400160,
    Undetermined = 400170,
    Unsupported = 400180,
    SessionBusy = 400190,
}

impl StatusCode {
    /// String name of the status, as the server spells it.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            StatusCode::Unspecified => "STATUS_CODE_UNSPECIFIED",
            StatusCode::Success => "SUCCESS",
            StatusCode::BadRequest => "BAD_REQUEST",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::Aborted => "ABORTED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Overloaded => "OVERLOADED",
            StatusCode::SchemeError => "SCHEME_ERROR",
            StatusCode::GenericError => "GENERIC_ERROR",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::BadSession => "BAD_SESSION",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::SessionExpired => "SESSION_EXPIRED",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Undetermined => "UNDETERMINED",
            StatusCode::Unsupported => "UNSUPPORTED",
            StatusCode::SessionBusy => "SESSION_BUSY",
        }
    }
}

/// One diagnostic issue attached to a server response. Issues nest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IssueMessage {
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub issue_code: u32,
    #[prost(uint32, tag = "5")]
    pub severity: u32,
    #[prost(message, repeated, tag = "6")]
    pub issues: ::prost::alloc::vec::Vec<IssueMessage>,
}

/// Flatten an issue tree into one displayable line.
pub fn join_issues(issues: &[IssueMessage]) -> String {
    fn walk(issues: &[IssueMessage], out: &mut Vec<String>) {
        for issue in issues {
            if !issue.message.is_empty() {
                out.push(issue.message.clone());
            }
            walk(&issue.issues, out);
        }
    }
    let mut parts = Vec::new();
    walk(issues, &mut parts);
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips_through_i32() {
        let code = StatusCode::SessionExpired;
        assert_eq!(StatusCode::try_from(code as i32).unwrap(), code);
        assert!(StatusCode::try_from(123).is_err());
    }

    #[test]
    fn issues_flatten_depth_first() {
        let issues = vec![IssueMessage {
            message: "outer".into(),
            issue_code: 1,
            severity: 1,
            issues: vec![IssueMessage {
                message: "inner".into(),
                issue_code: 2,
                severity: 1,
                issues: vec![],
            }],
        }];
        assert_eq!(join_issues(&issues), "outer; inner");
    }
}
