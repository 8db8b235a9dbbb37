use {
    http::{HeaderValue, Method},
    tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer},
};

use crate::error::GatewayError;

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

/// CORS policy for a configured origin: `*` allows any origin, anything
/// else is a comma-separated allow-list that may not contain `*`. Request
/// headers are mirrored back on preflight.
pub(crate) fn cors_layer(origin: &str) -> Result<CorsLayer, GatewayError> {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        if origin.split(',').any(|o| o.trim() == "*") {
            return Err(GatewayError::WildcardInOriginList {
                input: origin.to_string(),
            });
        }
        let origins = origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|source| GatewayError::InvalidCorsOrigin {
                    origin: o.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if origins.is_empty() {
            return Err(GatewayError::EmptyCorsOrigin);
        }
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(AllowHeaders::mirror_request()))
}
