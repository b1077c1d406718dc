use std::fs;
use std::path::Path;
use tempfile::TempDir;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_mock_server(status: u16, mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/latest/JPY"))
            .respond_with(ResponseTemplate::new(status).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub const RATES_RESPONSE: &str = r#"{
        "base": "JPY",
        "date": "2026-03-01",
        "time_last_updated": 1772323201,
        "rates": { "JPY": 1, "USD": 0.0067, "EUR": 0.0062, "GBP": 0.0053 }
    }"#;
}

const LISTING_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Lot 42</title></head>
<body>
<div class="lot"><div class="display current-bid notranslate">4,200 yen</div></div>
<table><tr><td><div class="fr notranslate">Buy it now</div></td></tr></table>
<div class="fee-breakdown"><ul>
<li>Shipping: <span class="notranslate">440 yen</span></li>
<li>Bank transfer: <span class="notranslate">300 yen</span></li>
</ul></div>
</body></html>"#;

fn write_config(dir: &Path, base_url: &str, extra: &str) -> String {
    let config_path = dir.join("config.yaml");
    let config_content = format!(
        r#"
providers:
  exchange_rate:
    base_url: "{}"
data_path: "{}"
{}
"#,
        base_url,
        dir.join("data").display(),
        extra
    );
    fs::write(&config_path, config_content).expect("Failed to write config file");
    config_path.to_string_lossy().into_owned()
}

#[test_log::test(tokio::test)]
async fn test_annotate_flow_with_mock() {
    let mock_server =
        test_utils::create_mock_server(200, test_utils::RATES_RESPONSE).await;
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), &mock_server.uri(), "");

    let input = temp_dir.path().join("listing.html");
    let output = temp_dir.path().join("listing.annotated.html");
    fs::write(&input, LISTING_PAGE).unwrap();

    let result = yen_to_freedom::run_command(
        yen_to_freedom::AppCommand::Annotate {
            input: input.clone(),
            output: Some(output.clone()),
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Annotate failed with: {:?}", result.err());

    let annotated = fs::read_to_string(&output).unwrap();
    assert!(annotated.starts_with("<!DOCTYPE html>"));
    assert!(annotated.contains("<div>≈ $28.14 USD</div><div>≈ €26.04 EUR</div>"));
    assert!(annotated.contains("440 yen<span"));
    assert!(annotated.contains(" (≈ $2.95 / €2.73)"));
    // No keyword in the bank transfer row
    assert!(!annotated.contains("$2.01"));
    assert_eq!(annotated.matches("yen-to-freedom-conversion").count(), 2);

    // The input is left alone
    assert_eq!(fs::read_to_string(&input).unwrap(), LISTING_PAGE);
}

#[test_log::test(tokio::test)]
async fn test_annotate_survives_provider_failure_with_fallback_rates() {
    let mock_server = test_utils::create_mock_server(500, "oops").await;
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(
        temp_dir.path(),
        &mock_server.uri(),
        "annotate:\n  fallback_rates:\n    USD: 0.0067\n    EUR: 0.0062\n",
    );

    let input = temp_dir.path().join("listing.html");
    let output = temp_dir.path().join("out.html");
    fs::write(&input, LISTING_PAGE).unwrap();

    let result = yen_to_freedom::run_command(
        yen_to_freedom::AppCommand::Annotate {
            input,
            output: Some(output.clone()),
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Annotate failed with: {:?}", result.err());
    assert!(fs::read_to_string(&output).unwrap().contains("≈ $28.14 USD"));
}

#[test_log::test(tokio::test)]
async fn test_refresh_with_mock() {
    let mock_server =
        test_utils::create_mock_server(200, test_utils::RATES_RESPONSE).await;
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), &mock_server.uri(), "");

    let result =
        yen_to_freedom::run_command(yen_to_freedom::AppCommand::Refresh, Some(&config_path))
            .await;
    assert!(result.is_ok(), "Refresh failed with: {:?}", result.err());
    assert!(temp_dir.path().join("data").join("cache").exists());
}

#[test_log::test(tokio::test)]
async fn test_refresh_reports_http_error() {
    let mock_server = test_utils::create_mock_server(503, "unavailable").await;
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), &mock_server.uri(), "");

    let error =
        yen_to_freedom::run_command(yen_to_freedom::AppCommand::Refresh, Some(&config_path))
            .await
            .unwrap_err();
    assert!(error.to_string().contains("HTTP 503"), "{error:#}");
}

#[test_log::test(tokio::test)]
async fn test_missing_input_is_an_error() {
    let mock_server =
        test_utils::create_mock_server(200, test_utils::RATES_RESPONSE).await;
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(temp_dir.path(), &mock_server.uri(), "");

    let error = yen_to_freedom::run_command(
        yen_to_freedom::AppCommand::Annotate {
            input: temp_dir.path().join("missing.html"),
            output: None,
        },
        Some(&config_path),
    )
    .await
    .unwrap_err();
    assert!(error.to_string().contains("Failed to read"));
}
