//! Stateless request checks, each `fn(&ViewRequest, &CheckContext) -> Result<(), Rejection>`.
//! Used by: validator.

use axum::http::Method;
use subtle::ConstantTimeEq;
use url::Url;

use super::{CheckContext, Rejection, ViewRequest};

pub type Check = fn(&ViewRequest, &CheckContext<'_>) -> Result<(), Rejection>;

/// Checks run before any shared state is touched, in order.
pub const REQUEST_CHECKS: &[Check] = &[check_csrf, check_transport, check_payload];

pub const AJAX_MARKER: &str = "XMLHttpRequest";

/// The presented token must equal the one issued for this session.
/// Any of the three token sources may carry it.
pub fn check_csrf(req: &ViewRequest, ctx: &CheckContext<'_>) -> Result<(), Rejection> {
    let Some(expected) = ctx.session_token.filter(|t| !t.is_empty()) else {
        return Err(Rejection::csrf());
    };
    let matches = req
        .csrf_candidates()
        .iter()
        .any(|presented| bool::from(presented.as_bytes().ct_eq(expected.as_bytes())));
    if matches {
        Ok(())
    } else {
        Err(Rejection::csrf())
    }
}

pub fn check_transport(req: &ViewRequest, _: &CheckContext<'_>) -> Result<(), Rejection> {
    let is_ajax = req
        .requested_with
        .as_deref()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(AJAX_MARKER));
    if req.method == Method::POST && is_ajax {
        Ok(())
    } else {
        Err(Rejection::transport())
    }
}

/// Undecodable bodies count as empty; decoded ones must stay under the ceiling.
pub fn check_payload(req: &ViewRequest, ctx: &CheckContext<'_>) -> Result<(), Rejection> {
    if req.body.is_empty() {
        return Ok(());
    }
    let decoded_len = serde_json::from_slice::<serde_json::Value>(&req.body)
        .ok()
        .and_then(|v| serde_json::to_vec(&v).ok())
        .map_or(0, |v| v.len());
    if decoded_len < ctx.max_payload_bytes {
        Ok(())
    } else {
        Err(Rejection::payload())
    }
}

/// The referring page's path must contain the item's public path.
pub fn check_referer(req: &ViewRequest, expected_path: &str) -> Result<(), Rejection> {
    let path = req
        .referer
        .as_deref()
        .and_then(|r| Url::parse(r).ok())
        .map(|u| u.path().to_owned())
        .ok_or_else(Rejection::referer)?;
    if !expected_path.is_empty() && path.contains(expected_path) {
        Ok(())
    } else {
        Err(Rejection::referer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::RejectKind;
    use axum::body::Bytes;

    const TOKEN: &str = "k3Jx9Qm2Vt7Lp0Rz5Wb8Nc4Yh6Fd1Ga3Se7Ui2Oo9P";

    fn valid() -> ViewRequest {
        ViewRequest {
            content_id: "post-1".into(),
            method: Method::POST,
            ip: "1.1.1.1".into(),
            user_agent: "Mozilla/5.0 test agent".into(),
            referer: Some("https://example.com/blog/hello-world/".into()),
            requested_with: Some(AJAX_MARKER.into()),
            csrf_header: Some(TOKEN.into()),
            csrf_alt_header: None,
            body: Bytes::new(),
        }
    }

    fn ctx() -> CheckContext<'static> {
        CheckContext {
            session_token: Some(TOKEN),
            max_payload_bytes: 100,
        }
    }

    mod csrf {
        use super::*;

        #[test]
        fn header_token_passes() {
            assert!(check_csrf(&valid(), &ctx()).is_ok());
        }

        #[test]
        fn alternate_header_passes() {
            let mut req = valid();
            req.csrf_header = None;
            req.csrf_alt_header = Some(TOKEN.into());
            assert!(check_csrf(&req, &ctx()).is_ok());
        }

        #[test]
        fn json_body_field_passes() {
            let mut req = valid();
            req.csrf_header = None;
            req.body = Bytes::from(format!(r#"{{"csrfmiddlewaretoken":"{TOKEN}"}}"#));
            assert!(check_csrf(&req, &ctx()).is_ok());
        }

        #[test]
        fn form_body_field_passes() {
            let mut req = valid();
            req.csrf_header = None;
            req.body = Bytes::from(format!("csrfmiddlewaretoken={TOKEN}"));
            assert!(check_csrf(&req, &ctx()).is_ok());
        }

        #[test]
        fn wrong_token_rejected() {
            let mut req = valid();
            req.csrf_header = Some("forged".into());
            let err = check_csrf(&req, &ctx()).unwrap_err();
            assert_eq!(err.kind, RejectKind::Csrf);
            assert_eq!(err.reason, "invalid CSRF token");
        }

        #[test]
        fn missing_session_rejected() {
            let no_session = CheckContext { session_token: None, max_payload_bytes: 100 };
            assert!(check_csrf(&valid(), &no_session).is_err());
        }

        #[test]
        fn missing_token_rejected() {
            let mut req = valid();
            req.csrf_header = None;
            assert!(check_csrf(&req, &ctx()).is_err());
        }
    }

    mod transport {
        use super::*;

        #[test]
        fn ajax_post_passes() {
            assert!(check_transport(&valid(), &ctx()).is_ok());
        }

        #[test]
        fn get_rejected() {
            let mut req = valid();
            req.method = Method::GET;
            assert_eq!(check_transport(&req, &ctx()).unwrap_err().reason, "invalid request type");
        }

        #[test]
        fn missing_marker_rejected() {
            let mut req = valid();
            req.requested_with = None;
            assert!(check_transport(&req, &ctx()).is_err());
        }

        #[test]
        fn marker_is_case_insensitive() {
            let mut req = valid();
            req.requested_with = Some("xmlhttprequest".into());
            assert!(check_transport(&req, &ctx()).is_ok());
        }
    }

    mod payload {
        use super::*;

        #[test]
        fn empty_body_passes() {
            assert!(check_payload(&valid(), &ctx()).is_ok());
        }

        #[test]
        fn small_json_passes() {
            let mut req = valid();
            req.body = Bytes::from_static(br#"{"source":"scroll"}"#);
            assert!(check_payload(&req, &ctx()).is_ok());
        }

        #[test]
        fn malformed_body_is_treated_as_empty() {
            let mut req = valid();
            req.body = Bytes::from("{not json".repeat(50));
            assert!(check_payload(&req, &ctx()).is_ok());
        }

        #[test]
        fn oversized_json_rejected() {
            let mut req = valid();
            req.body = Bytes::from(format!(r#"{{"pad":"{}"}}"#, "x".repeat(200)));
            let err = check_payload(&req, &ctx()).unwrap_err();
            assert_eq!(err.kind, RejectKind::Payload);
            assert_eq!(err.reason, "invalid payload");
        }

        #[test]
        fn ceiling_is_exclusive() {
            let mut req = valid();
            // {"p":"…"} is 8 bytes of framing
            req.body = Bytes::from(format!(r#"{{"p":"{}"}}"#, "x".repeat(92)));
            assert!(check_payload(&req, &ctx()).is_err());
            req.body = Bytes::from(format!(r#"{{"p":"{}"}}"#, "x".repeat(91)));
            assert!(check_payload(&req, &ctx()).is_ok());
        }
    }

    mod referer {
        use super::*;

        #[test]
        fn matching_path_passes() {
            assert!(check_referer(&valid(), "/blog/hello-world/").is_ok());
        }

        #[test]
        fn unrelated_path_rejected() {
            let mut req = valid();
            req.referer = Some("https://example.com/projects/other/".into());
            let err = check_referer(&req, "/blog/hello-world/").unwrap_err();
            assert_eq!(err.kind, RejectKind::Referer);
            assert_eq!(err.reason, "invalid referer");
        }

        #[test]
        fn path_in_query_string_rejected() {
            let mut req = valid();
            req.referer = Some("https://evil.example/?next=/blog/hello-world/".into());
            assert!(check_referer(&req, "/blog/hello-world/").is_err());
        }

        #[test]
        fn missing_or_garbage_referer_rejected() {
            let mut req = valid();
            req.referer = None;
            assert!(check_referer(&req, "/blog/hello-world/").is_err());
            req.referer = Some("not a url".into());
            assert!(check_referer(&req, "/blog/hello-world/").is_err());
        }
    }

    #[test]
    fn checks_run_in_order() {
        let mut req = valid();
        req.csrf_header = None;
        req.method = Method::GET;
        let first_failure = REQUEST_CHECKS.iter().find_map(|check| check(&req, &ctx()).err());
        assert_eq!(first_failure.map(|r| r.kind), Some(RejectKind::Csrf));
    }
}
