use serde_json::Value;

/// A sandbox execution payload, in either of the two shapes the service
/// is known to emit.
///
/// Pool-managed sandboxes wrap everything under a `properties` object;
/// self-hosted runners may answer with a flat object using `output`,
/// `error`, `return_code` and `success` keys.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxResponse {
    Wrapped {
        status: Option<String>,
        stdout: String,
        stderr: String,
        return_code: Option<i64>,
    },
    Direct {
        stdout: String,
        stderr: String,
        return_code: i64,
        success: bool,
    },
}

impl SandboxResponse {
    /// Shape detection keys off the presence of a `properties` object.
    /// Missing fields fall back to empty strings and type-appropriate
    /// defaults rather than failing the parse.
    pub fn from_value(body: &Value) -> Self {
        if let Some(props) = body.get("properties").and_then(Value::as_object) {
            SandboxResponse::Wrapped {
                status: props.get("status").and_then(Value::as_str).map(String::from),
                stdout: str_field(props.get("stdout")),
                stderr: str_field(props.get("stderr")),
                return_code: props.get("returnCode").and_then(Value::as_i64),
            }
        } else {
            SandboxResponse::Direct {
                stdout: str_field(body.get("output")),
                stderr: str_field(body.get("error")),
                return_code: body.get("return_code").and_then(Value::as_i64).unwrap_or(0),
                success: body.get("success").and_then(Value::as_bool).unwrap_or(true),
            }
        }
    }
}

fn str_field(v: Option<&Value>) -> String {
    v.and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Shape-independent view of an execution result, ready for
/// failure classification.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i64>,
    /// `properties.status` from the wrapped shape, if present.
    pub status_hint: Option<String>,
    /// `success` from the direct shape. `Some` also marks the result as
    /// having come from the direct shape.
    pub success_hint: Option<bool>,
}

pub fn normalize(response: SandboxResponse) -> CanonicalResult {
    match response {
        SandboxResponse::Wrapped {
            status,
            stdout,
            stderr,
            return_code,
        } => CanonicalResult {
            stdout,
            stderr,
            return_code,
            status_hint: status,
            success_hint: None,
        },
        SandboxResponse::Direct {
            stdout,
            stderr,
            return_code,
            success,
        } => CanonicalResult {
            stdout,
            stderr,
            return_code: Some(return_code),
            status_hint: None,
            success_hint: Some(success),
        },
    }
}
