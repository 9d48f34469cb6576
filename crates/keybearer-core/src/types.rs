use serde::{Deserialize, Serialize};

/// Operation a worker message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOp {
    SetIterations,
    SetPlaintext,
    Encrypt,
}

impl std::fmt::Display for WorkerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkerOp::SetIterations => "set_iterations",
            WorkerOp::SetPlaintext => "set_plaintext",
            WorkerOp::Encrypt => "encrypt",
        })
    }
}

/// A request sent to the encryption worker
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    SetIterations {
        iterations: u32,
    },
    SetPlaintext {
        data: Vec<u8>,
        filename: String,
        mime: String,
    },
    /// Encrypt the loaded plaintext; `progress` asks for per-derivation updates.
    Encrypt {
        passwords: Vec<String>,
        threshold: usize,
        #[serde(default)]
        progress: bool,
    },
}

impl WorkerRequest {
    pub fn op(&self) -> WorkerOp {
        match self {
            WorkerRequest::SetIterations { .. } => WorkerOp::SetIterations,
            WorkerRequest::SetPlaintext { .. } => WorkerOp::SetPlaintext,
            WorkerRequest::Encrypt { .. } => WorkerOp::Encrypt,
        }
    }
}

// Passcodes and file contents stay out of logs.
impl std::fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerRequest::SetIterations { iterations } => f
                .debug_struct("SetIterations")
                .field("iterations", iterations)
                .finish(),
            WorkerRequest::SetPlaintext { data, filename, mime } => f
                .debug_struct("SetPlaintext")
                .field("len", &data.len())
                .field("filename", filename)
                .field("mime", mime)
                .finish(),
            WorkerRequest::Encrypt {
                passwords,
                threshold,
                progress,
            } => f
                .debug_struct("Encrypt")
                .field("passwords", &passwords.len())
                .field("threshold", threshold)
                .field("progress", progress)
                .finish(),
        }
    }
}

/// Final payload of a successful request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerResult {
    Ack,
    Envelope { json: String },
}

/// A message sent back by the encryption worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Progress { op: WorkerOp, fraction: f64 },
    Done { op: WorkerOp, result: WorkerResult },
    Failed { op: WorkerOp, error: String },
}

impl WorkerResponse {
    pub fn op(&self) -> WorkerOp {
        match self {
            WorkerResponse::Progress { op, .. }
            | WorkerResponse::Done { op, .. }
            | WorkerResponse::Failed { op, .. } => *op,
        }
    }

    /// Whether this message ends its request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerResponse::Progress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let req = WorkerRequest::Encrypt {
            passwords: vec!["alpha".into(), "beta".into()],
            threshold: 2,
            progress: true,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "encrypt");
        assert_eq!(value["threshold"], 2);
        assert_eq!(value["progress"], true);

        let back: WorkerRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_progress_flag_optional() {
        let req: WorkerRequest =
            serde_json::from_str(r#"{"type":"encrypt","passwords":["a"],"threshold":1}"#).unwrap();
        assert!(matches!(req, WorkerRequest::Encrypt { progress: false, .. }));
        assert_eq!(req.op(), WorkerOp::Encrypt);
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = WorkerResponse::Done {
            op: WorkerOp::Encrypt,
            result: WorkerResult::Envelope { json: "{}".into() },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "done");
        assert_eq!(value["op"], "encrypt");
        assert_eq!(value["result"]["kind"], "envelope");
        assert!(resp.is_terminal());

        let progress = WorkerResponse::Progress {
            op: WorkerOp::Encrypt,
            fraction: 0.5,
        };
        assert!(!progress.is_terminal());
        assert_eq!(progress.op(), WorkerOp::Encrypt);
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<WorkerRequest>(r#"{"type":"decrypt"}"#).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let req = WorkerRequest::Encrypt {
            passwords: vec!["hunter2".into()],
            threshold: 1,
            progress: false,
        };
        assert!(!format!("{req:?}").contains("hunter2"));
    }
}
