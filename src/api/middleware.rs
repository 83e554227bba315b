//! Authentication: pull the authenticated client id out of the
//! connection's peer certificate and attach it to the request.
//!
//! Mirrors the original's `authContext`/`AuthUnary`/`AuthStream`: the
//! identity is derived once, from the TLS layer, and carried alongside
//! the request rather than trusted from any request field.

use tonic::{Request, Status};

use crate::api::tls::ClientCertInfo;

/// The authenticated client identity, attached to request extensions
/// by `authenticate`.
#[derive(Clone, Debug)]
pub struct ClientId(pub String);

/// Interceptor applied to every RPC, unary or streaming: reads the
/// connection's peer leaf certificate (attached by tonic via
/// `Connected::connect_info`), extracts its Subject CommonName, and
/// rejects the request with `PermissionDenied` if it is missing or
/// empty.
pub fn authenticate(mut request: Request<()>) -> Result<Request<()>, Status> {
    let cert_info = request
        .extensions()
        .get::<ClientCertInfo>()
        .cloned()
        .ok_or_else(|| Status::permission_denied("no client certificate presented"))?;

    let der = cert_info
        .peer_leaf_cert
        .ok_or_else(|| Status::permission_denied("no client certificate presented"))?;

    let common_name = crate::api::tls::common_name_from_der(&der)
        .map_err(|e| Status::permission_denied(format!("invalid client certificate: {e}")))?;

    if common_name.is_empty() {
        return Err(Status::permission_denied("client certificate has no CommonName"));
    }

    request.extensions_mut().insert(ClientId(common_name));
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_info_is_permission_denied() {
        let request = Request::new(());
        let err = authenticate(request).unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn empty_der_is_permission_denied() {
        let mut request = Request::new(());
        request.extensions_mut().insert(ClientCertInfo {
            peer_leaf_cert: None,
        });
        let err = authenticate(request).unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }
}
