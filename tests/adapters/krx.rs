use httpmock::Method::POST;
use httpmock::MockServer;
use url::Url;

use fundfill::adapter::krx::KrxAdapter;
use fundfill::adapter::{AdapterOutcome, FetchRequest, SourceAdapter};
use fundfill::core::{PeriodType, Region};

fn adapter_for(server: &MockServer) -> KrxAdapter {
    KrxAdapter::builder()
        .base_url(Url::parse(&server.url("/getJsonData.cmd")).unwrap())
        .build()
        .unwrap()
}

fn annual_request(ticker: &str, year: i32) -> FetchRequest<'_> {
    FetchRequest {
        ticker,
        region: Region::Kr,
        fiscal_year: year,
        period_type: PeriodType::Annual,
    }
}

fn snapshot_body() -> String {
    serde_json::json!({
        "OutBlock_1": [
            {"ISU_SRT_CD": "005930", "ISU_ABBRV": "삼성전자",
             "TDD_CLSPRC": "53,200", "MKTCAP": "317,586,931,550,000",
             "LIST_SHRS": "5,969,782,550", "PER": "10.43", "PBR": "0.94",
             "DPS": "1,446"},
            {"ISU_SRT_CD": "000660", "ISU_ABBRV": "SK하이닉스",
             "TDD_CLSPRC": "173,900", "MKTCAP": "126,592,117,761,300",
             "LIST_SHRS": "728,002,365", "PER": "-", "PBR": "1.86",
             "DPS": "1,200"}
        ]
    })
    .to_string()
}

/* ------------- happy parse ------------- */

#[tokio::test]
async fn picks_the_requested_ticker_out_of_the_market_snapshot() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/getJsonData.cmd")
            .body_includes("trdDd=20241231");
        then.status(200)
            .header("content-type", "application/json")
            .body(snapshot_body());
    });

    let adapter = adapter_for(&server);
    let outcome = adapter.fetch(annual_request("005930", 2024)).await.unwrap();
    mock.assert();

    let AdapterOutcome::Record(rec) = outcome else {
        panic!("expected a record");
    };
    assert_eq!(rec.data_source, "KRX");
    assert_eq!(rec.per, Some(10.43));
    assert_eq!(rec.pbr, Some(0.94));
    assert_eq!(rec.close_price, Some(53_200.0));
    assert_eq!(rec.market_cap, Some(317_586_931_550_000));
    assert_eq!(rec.shares_outstanding, Some(5_969_782_550));
    assert_eq!(rec.dividend_per_share, Some(1_446.0));
    assert_eq!(
        rec.report_date,
        chrono::NaiveDate::from_ymd_opt(2024, 12, 31)
    );
    // statement lines are not this source's business
    assert_eq!(rec.revenue, None);
}

#[tokio::test]
async fn dash_placeholders_become_nulls() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/getJsonData.cmd");
        then.status(200)
            .header("content-type", "application/json")
            .body(snapshot_body());
    });

    let adapter = adapter_for(&server);
    let outcome = adapter.fetch(annual_request("000660", 2024)).await.unwrap();
    let AdapterOutcome::Record(rec) = outcome else {
        panic!("expected a record");
    };
    assert_eq!(rec.per, None, "loss-making names print a dash");
    assert_eq!(rec.pbr, Some(1.86));
}

/* ------------- misses ------------- */

#[tokio::test]
async fn ticker_missing_from_the_snapshot_is_empty() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/getJsonData.cmd");
        then.status(200)
            .header("content-type", "application/json")
            .body(snapshot_body());
    });

    let adapter = adapter_for(&server);
    let outcome = adapter.fetch(annual_request("035720", 2024)).await.unwrap();
    assert_eq!(outcome, AdapterOutcome::Empty);
}

#[tokio::test]
async fn non_kr_regions_are_empty_without_a_request() {
    let server = MockServer::start();
    let adapter = adapter_for(&server);
    let req = FetchRequest {
        region: Region::Us,
        ..annual_request("AAPL", 2024)
    };
    assert_eq!(adapter.fetch(req).await.unwrap(), AdapterOutcome::Empty);
}

#[tokio::test]
async fn quarter_snapshots_use_the_quarter_end_date() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/getJsonData.cmd")
            .body_includes("trdDd=20240930");
        then.status(200)
            .header("content-type", "application/json")
            .body(snapshot_body());
    });

    let adapter = adapter_for(&server);
    let req = FetchRequest {
        period_type: PeriodType::Q3,
        ..annual_request("005930", 2024)
    };
    let outcome = adapter.fetch(req).await.unwrap();
    mock.assert();
    let AdapterOutcome::Record(rec) = outcome else {
        panic!("expected a record");
    };
    assert_eq!(
        rec.report_date,
        chrono::NaiveDate::from_ymd_opt(2024, 9, 30)
    );
}
