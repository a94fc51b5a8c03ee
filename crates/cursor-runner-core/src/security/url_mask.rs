//! URL query-string masking for webhook log lines (spec §4.F).
//!
//! Any query parameter whose name matches one of [`SENSITIVE_PARAM_NAMES`]
//! (case-insensitive) has its value replaced with `***` before the URL is
//! written to a log record. This only touches the query string; scheme,
//! host, and path are left intact so the log line still identifies the
//! destination.

const SENSITIVE_PARAM_NAMES: &[&str] = &["secret", "token", "key", "password", "api_key"];

/// Mask sensitive query-parameter values in `url` for logging.
///
/// Malformed URLs (no `?`, or query pairs without `=`) are returned with
/// whatever prefix can be parsed masked; this is a best-effort log helper,
/// not a URL validator.
pub fn mask_query_params(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let masked_pairs: Vec<String> = query
        .split('&')
        .map(|pair| {
            if pair.is_empty() {
                return pair.to_string();
            }
            match pair.split_once('=') {
                Some((name, _value)) if is_sensitive(name) => format!("{name}=***"),
                Some((name, value)) => format!("{name}={value}"),
                None => pair.to_string(),
            }
        })
        .collect();

    format!("{base}?{}", masked_pairs.join("&"))
}

fn is_sensitive(param_name: &str) -> bool {
    SENSITIVE_PARAM_NAMES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(param_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_secret_param() {
        let url = "https://example.com/hook?secret=abc123&foo=bar";
        assert_eq!(
            mask_query_params(url),
            "https://example.com/hook?secret=***&foo=bar"
        );
    }

    #[test]
    fn masks_case_insensitively() {
        let url = "https://example.com/hook?API_KEY=xyz";
        assert_eq!(mask_query_params(url), "https://example.com/hook?API_KEY=***");
    }

    #[test]
    fn masks_multiple_sensitive_params() {
        let url = "https://example.com/hook?token=t1&password=p1&name=ok";
        assert_eq!(
            mask_query_params(url),
            "https://example.com/hook?token=***&password=***&name=ok"
        );
    }

    #[test]
    fn leaves_non_sensitive_params_untouched() {
        let url = "https://example.com/hook?requestId=req-1&queue=default";
        assert_eq!(mask_query_params(url), url);
    }

    #[test]
    fn url_without_query_is_unchanged() {
        let url = "https://example.com/hook";
        assert_eq!(mask_query_params(url), url);
    }
}
