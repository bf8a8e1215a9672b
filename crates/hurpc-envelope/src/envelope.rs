use bytes::Bytes;

/// The unit exchanged over the wire: a call request or its terminal response.
///
/// The token is chosen by the side that issues a call and echoed back
/// unchanged in the response, so only the initiator ever interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Call identifier, unique among the initiator's outstanding calls.
    pub token: i64,
    /// Remote operation name. Only meaningful on requests.
    pub method: String,
    /// `false` for a request that needs a handler, `true` for its response.
    pub completed: bool,
    /// Error text; set only on a completed envelope that failed.
    pub error: String,
    /// Opaque argument or result bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Build a request for `method`.
    pub fn request(token: i64, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            token,
            method: method.into(),
            completed: false,
            error: String::new(),
            payload: payload.into(),
        }
    }

    /// Build a successful response echoing `token`.
    pub fn response(token: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            token,
            completed: true,
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Build a failed response echoing `token`. The payload is empty.
    pub fn failure(token: i64, error: impl Into<String>) -> Self {
        Self {
            token,
            completed: true,
            error: error.into(),
            ..Self::default()
        }
    }

    /// Whether this envelope asks the receiver to run a handler.
    pub fn is_request(&self) -> bool {
        !self.completed
    }

    /// Whether this is a completed envelope carrying an error.
    pub fn is_failure(&self) -> bool {
        self.completed && !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_not_completed() {
        let env = Envelope::request(7, "echo", &b"ping"[..]);
        assert!(env.is_request());
        assert!(!env.is_failure());
        assert_eq!(env.method, "echo");
        assert_eq!(env.payload.as_ref(), b"ping");
    }

    #[test]
    fn failure_has_empty_payload() {
        let env = Envelope::failure(3, "boom");
        assert!(env.completed);
        assert!(env.is_failure());
        assert!(env.payload.is_empty());
        assert!(env.method.is_empty());
    }

    #[test]
    fn response_with_empty_error_is_success() {
        let env = Envelope::response(3, Bytes::new());
        assert!(env.completed);
        assert!(!env.is_failure());
    }
}
