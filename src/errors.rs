error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    errors {
        Connection(msg: String) {
            description("Connection error")
            display("Connection error: {}", msg)
        }

        HttpStatus(code: u16, reason: String) {
            description("HTTP error status")
            display("{}", reason)
        }

        InvalidResponse(msg: String) {
            description("Invalid response")
            display("Invalid response: {}", msg)
        }

        InvalidRequest(msg: String) {
            description("Invalid request")
            display("Invalid request: {}", msg)
        }

        MissingInputs(txid: String) {
            description("Missing Inputs")
            display("Missing Inputs (faucet txid {})", txid)
        }

        VerificationFailed(msg: String) {
            description("Verification failed")
            display("Verification failed: {}", msg)
        }
    }
}

const BAD_REQUEST: &str = "Bad Request";

impl Error {
    /// The faucet answers "Bad Request" while the chain is too short to have
    /// spendable coinbase outputs.
    pub fn is_bad_request(&self) -> bool {
        match self.kind() {
            ErrorKind::HttpStatus(_, reason) => reason == BAD_REQUEST,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::HttpStatus(404, _))
    }

    pub fn is_missing_inputs(&self) -> bool {
        matches!(self.kind(), ErrorKind::MissingInputs(_))
    }
}

pub fn invalid_request(what: String) -> ErrorKind {
    ErrorKind::InvalidRequest(what)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_matches_reason() {
        let err: Error = ErrorKind::HttpStatus(400, "Bad Request".into()).into();
        assert!(err.is_bad_request());
        assert_eq!("Bad Request", err.to_string());

        let err: Error = ErrorKind::HttpStatus(400, "Invalid address".into()).into();
        assert!(!err.is_bad_request());

        let err: Error = ErrorKind::Connection("refused".into()).into();
        assert!(!err.is_bad_request());
    }

    #[test]
    fn test_not_found() {
        let err: Error = ErrorKind::HttpStatus(404, "Not Found".into()).into();
        assert!(err.is_not_found());
        assert!(!err.is_bad_request());
    }
}
