use axum::{response::Html, routing::get, Router};

const INDEX_PAGE: &str = r#"<html>
<head><title>Deconz Exporter</title></head>
<body>
<h1>Deconz Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/sensors">Sensors</a></p>
</body>
</html>"#;

// ---

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/", get(|| async { Html(INDEX_PAGE) }))
}
