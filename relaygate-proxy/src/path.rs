use percent_encoding::percent_decode_str;

/// The admission shape a request resolved to, per the parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Keyed {
        api_key: String,
        residual: String,
    },
    Public {
        chain: String,
        residual: String,
    },
}

/// Parses `path`/`query` into a `Route`. Falls back to `header_api_key`
/// (the `X-Api-Key`/`x-api-key` header) when `/api=<KEY>` carries no key.
/// Pure and panic-free: malformed or unrecognised paths yield `None`, which
/// the dispatcher turns into a 403.
pub fn parse_route(path: &str, query: &str, header_api_key: Option<&str>) -> Option<Route> {
    if path == "/health" {
        return Some(Route::Health);
    }

    if let Some(rest) = path.strip_prefix("/api=") {
        let key_in_path = rest.split('/').next().unwrap_or("");
        let api_key = if key_in_path.is_empty() {
            header_api_key?.to_string()
        } else {
            key_in_path.to_string()
        };
        if api_key.is_empty() {
            return None;
        }
        let residual = residual_after(path, 2, query);
        return Some(Route::Keyed { api_key, residual });
    }

    if let Some(rest) = path.strip_prefix("/chain/") {
        let chain = rest.split('/').next().unwrap_or("");
        if chain.is_empty() {
            return None;
        }
        let residual = residual_after(path, 3, query);
        return Some(Route::Public {
            chain: chain.to_string(),
            residual,
        });
    }

    None
}

/// Strips the leading route segment (the first `n` `/`-delimited parts,
/// including the empty part before the leading slash), rejoins the rest
/// with a leading `/`, and appends the once-decoded query string.
fn residual_after(path: &str, n: usize, query: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= n {
        return String::new();
    }
    let remaining = &parts[n..];
    let mut residual = format!("/{}", remaining.join("/"));

    if !query.is_empty() {
        let decoded = percent_decode_str(query).decode_utf8_lossy();
        residual.push('?');
        residual.push_str(&decoded);
    }

    residual
}
