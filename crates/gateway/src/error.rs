use http::header::InvalidHeaderValue;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid CORS origin {origin:?}: {source}")]
    InvalidCorsOrigin {
        origin: String,
        #[source]
        source: InvalidHeaderValue,
    },

    #[error("wildcard origin (`*`) cannot be part of a list: {input}")]
    WildcardInOriginList { input: String },

    #[error("CORS origin list is empty")]
    EmptyCorsOrigin,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
