//! Downloads directory documents from caches and authorities.
//!
//! This crate is the network-facing counterpart to the directory
//! cache: it knows how to turn a [`request::Request`] into the HTTP-style
//! resource path the Tor directory protocol expects, and how to hand
//! back the bytes (or failure) of the response. It deliberately knows
//! nothing about *when* to fetch something, how to verify what comes
//! back, or how to store it — that's the cache core's job.
//!
//! Building the circuit a request travels over is out of scope here
//! too: [`DirectoryTransport`] is the seam a real circuit manager would
//! implement.

#![allow(clippy::exhaustive_structs)]
#![allow(clippy::exhaustive_enums)]

pub mod request;

use std::fmt;

use tor_linkspec::RelayId;

/// An error that can occur while fetching a directory resource.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport couldn't complete the request at all (connection
    /// refused, circuit failed, timed out, ...).
    #[error("could not connect to {0}")]
    CouldNotConnect(String),
    /// The remote side replied, but with a non-2xx HTTP status.
    #[error("directory cache returned HTTP {0}")]
    HttpStatus(u16),
    /// The response body wasn't a well-formed HTTP response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// The response to a directory request: status, and (if any) body.
#[derive(Clone, Debug)]
pub struct DirResponse {
    /// The relay or cache we fetched this from, if known.
    source: Option<RelayId>,
    /// The HTTP status code in the response.
    status: u16,
    /// The (possibly decompressed) response body.
    body: Vec<u8>,
}

impl DirResponse {
    /// Construct a new successful `DirResponse`.
    pub fn new(status: u16, source: Option<RelayId>, body: Vec<u8>) -> Self {
        DirResponse {
            source,
            status,
            body,
        }
    }

    /// Return the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Return the response body.
    pub fn body(&self) -> &[u8] {
        &self.body[..]
    }

    /// Consume this response, returning its body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Return who we fetched this from, if known.
    pub fn source(&self) -> Option<&RelayId> {
        self.source.as_ref()
    }
}

/// A description of where a request was sent, for error messages and
/// logging.
#[derive(Clone, Debug, Default)]
pub struct RequestTarget(Option<String>);

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "<unknown cache>"),
        }
    }
}

/// The seam between the directory cache and the rest of the Tor
/// client: whatever builds circuits and speaks the link protocol
/// implements this to let the cache fetch resources without knowing
/// how.
#[async_trait::async_trait]
pub trait DirectoryTransport {
    /// Fetch `resource` (an HTTP-style path, as produced by
    /// [`request::Request::make_resource_path`]) and return the
    /// response.
    async fn fetch(&self, resource: &str) -> Result<DirResponse, Error>;
}

/// Fetch `req` using `transport`, returning the raw response.
///
/// Callers are responsible for parsing and verifying the returned
/// bytes; this function only handles the network round-trip.
pub async fn get_resource(
    req: &dyn request::Request,
    transport: &dyn DirectoryTransport,
) -> Result<DirResponse, Error> {
    let path = req.make_resource_path();
    let resp = transport.fetch(&path).await?;
    if !(200..300).contains(&resp.status) {
        return Err(Error::HttpStatus(resp.status));
    }
    Ok(resp)
}
