//! Message framing and response production.
//!
//! The loop knows nothing about the protocol. It asks the handler whether the
//! bytes received so far form a complete request, and once they do, asks it
//! for the full response to send back.

/// Pluggable request framing and response builder.
pub trait RequestHandler {
    /// Whether `received` holds a complete request.
    ///
    /// Called with every byte received so far on the connection, after each
    /// successful read. Must be pure.
    fn is_request_complete(&self, received: &[u8]) -> bool;

    /// Produce the whole response for a complete request.
    fn build_response(&self, request: &[u8]) -> Vec<u8>;
}

/// `RequestHandler` built from a pair of closures.
///
/// ```ignore
/// let handler = FnHandler::new(
///     |buf: &[u8]| buf.ends_with(b"\n"),
///     |req: &[u8]| req.to_ascii_uppercase(),
/// );
/// ```
pub struct FnHandler<P, B> {
    is_complete: P,
    build: B,
}

impl<P, B> FnHandler<P, B>
where
    P: Fn(&[u8]) -> bool,
    B: Fn(&[u8]) -> Vec<u8>,
{
    pub fn new(is_complete: P, build: B) -> Self {
        Self { is_complete, build }
    }
}

impl<P, B> RequestHandler for FnHandler<P, B>
where
    P: Fn(&[u8]) -> bool,
    B: Fn(&[u8]) -> Vec<u8>,
{
    fn is_request_complete(&self, received: &[u8]) -> bool {
        (self.is_complete)(received)
    }

    fn build_response(&self, request: &[u8]) -> Vec<u8> {
        (self.build)(request)
    }
}

impl<H: RequestHandler + ?Sized> RequestHandler for &H {
    fn is_request_complete(&self, received: &[u8]) -> bool {
        (**self).is_request_complete(received)
    }

    fn build_response(&self, request: &[u8]) -> Vec<u8> {
        (**self).build_response(request)
    }
}

impl<H: RequestHandler + ?Sized> RequestHandler for std::sync::Arc<H> {
    fn is_request_complete(&self, received: &[u8]) -> bool {
        (**self).is_request_complete(received)
    }

    fn build_response(&self, request: &[u8]) -> Vec<u8> {
        (**self).build_response(request)
    }
}

/// Frames on a fixed byte delimiter and answers with a constant body.
///
/// Mostly useful in tests and benchmarks.
#[derive(Debug, Clone)]
pub struct DelimitedEcho {
    delimiter: Vec<u8>,
}

impl DelimitedEcho {
    pub fn new(delimiter: &[u8]) -> Self {
        Self {
            delimiter: delimiter.to_vec(),
        }
    }
}

impl RequestHandler for DelimitedEcho {
    fn is_request_complete(&self, received: &[u8]) -> bool {
        !self.delimiter.is_empty()
            && received
                .windows(self.delimiter.len())
                .any(|w| w == self.delimiter.as_slice())
    }

    fn build_response(&self, request: &[u8]) -> Vec<u8> {
        request.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_handler() {
        let h = FnHandler::new(|b: &[u8]| b.len() >= 3, |b: &[u8]| b.iter().rev().copied().collect());
        assert!(!h.is_request_complete(b"ab"));
        assert!(h.is_request_complete(b"abc"));
        assert_eq!(h.build_response(b"abc"), b"cba".to_vec());
    }

    #[test]
    fn test_delimited_echo() {
        let h = DelimitedEcho::new(b"\r\n\r\n");
        assert!(!h.is_request_complete(b"GET / HTTP/1.1\r\n"));
        assert!(h.is_request_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert_eq!(h.build_response(b"x"), b"x".to_vec());
    }

    #[test]
    fn test_blanket_ref_impl() {
        fn framed<H: RequestHandler>(h: H, b: &[u8]) -> bool {
            h.is_request_complete(b)
        }
        let h = DelimitedEcho::new(b";");
        assert!(framed(&h, b"a;"));
        assert!(framed(std::sync::Arc::new(h), b";"));
    }
}
