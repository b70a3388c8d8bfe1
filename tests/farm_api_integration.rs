//! Integration tests for the coordinator REST API.
//!
//! Each test spins up an Axum server on a random port over an in-memory
//! store and exercises the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use uuid::Uuid;

use device_farm::api::{AppState, farm_routes};
use device_farm::fleet::FleetRegistry;
use device_farm::jobs::{JobDispatcher, ResultAggregator, StatusReporter};
use device_farm::queue::DeviceMailbox;
use device_farm::store::{FarmStore, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the coordinator on a random port, return (base_url, client).
async fn start_server() -> (String, reqwest::Client) {
    let store: Arc<dyn FarmStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let registry = Arc::new(FleetRegistry::new(
        Arc::clone(&store),
        Duration::from_secs(300),
    ));
    let state = AppState {
        dispatcher: Arc::new(JobDispatcher::new(Arc::clone(&store), Arc::clone(&registry))),
        aggregator: Arc::new(ResultAggregator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        )),
        reporter: Arc::new(StatusReporter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        )),
        mailbox: Arc::new(DeviceMailbox::new(
            Arc::clone(&store),
            Duration::from_secs(60),
        )),
        registry,
    };
    let app = farm_routes(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), reqwest::Client::new())
}

async fn register(client: &reqwest::Client, base: &str, device_id: &str) {
    let resp = client
        .post(format!("{base}/api/devices/register"))
        .json(&json!({
            "device_id": device_id,
            "device_name": format!("Device {device_id}"),
            "account_handle": format!("acct_{device_id}"),
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
}

async fn dispatch(client: &reqwest::Client, base: &str, target_url: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "target_url": target_url, "action": "like" }))
        .send()
        .await
        .unwrap()
}

async fn report(
    client: &reqwest::Client,
    base: &str,
    job_id: &str,
    device_id: &str,
    success: bool,
    error_message: Option<&str>,
) -> reqwest::Response {
    client
        .post(format!("{base}/api/jobs/result"))
        .json(&json!({
            "job_id": job_id,
            "device_id": device_id,
            "success": success,
            "error_message": error_message,
        }))
        .send()
        .await
        .unwrap()
}

async fn job_status(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    client
        .get(format!("{base}/api/jobs/{job_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn full_job_lifecycle_two_devices() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;

        register(&client, &base, "d1").await;
        register(&client, &base, "d2").await;

        let resp = dispatch(&client, &base, "https://example.com/someuser/status/12345").await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["target_id"], "12345");
        assert_eq!(body["devices_targeted"], 2);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        // Two assignments, all still assigned, job distributed
        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["status"], "distributed");
        assert_eq!(status["target_device_count"], 2);
        let assignments = status["assignments"].as_array().unwrap();
        assert_eq!(assignments.len(), 2);
        assert!(assignments.iter().all(|a| a["status"] == "assigned"));

        // First device succeeds — job still open
        let resp = report(&client, &base, &job_id, "d1", true, None).await;
        assert_eq!(resp.status(), 200);
        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["completed_count"], 1);
        assert_eq!(status["failed_count"], 0);
        assert_eq!(status["status"], "distributed");

        // Second device fails — denominator reached, job completes
        let resp = report(&client, &base, &job_id, "d2", false, Some("timeout")).await;
        assert_eq!(resp.status(), 200);
        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["completed_count"], 1);
        assert_eq!(status["failed_count"], 1);
        assert_eq!(status["status"], "completed");

        let d2 = status["assignments"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["device_id"] == "d2")
            .unwrap();
        assert_eq!(d2["status"], "failed");
        assert_eq!(d2["error_message"], "timeout");

        // Device stats reflect the outcomes
        let devices: Value = client
            .get(format!("{base}/api/devices"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(devices["total_devices"], 2);
        let d1 = devices["online_devices"]
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["device_id"] == "d1")
            .unwrap();
        assert_eq!(d1["jobs_completed"], 1);
        assert_eq!(d1["jobs_failed"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_result_is_conflict_and_counts_once() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;
        register(&client, &base, "d2").await;

        let body: Value = dispatch(&client, &base, "https://example.com/u/status/777")
            .await
            .json()
            .await
            .unwrap();
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let resp = report(&client, &base, &job_id, "d1", true, None).await;
        assert_eq!(resp.status(), 200);

        // Identical second report: rejected, nothing double-counted.
        let resp = report(&client, &base, &job_id, "d1", true, None).await;
        assert_eq!(resp.status(), 409);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "duplicate_result");

        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["completed_count"], 1);
        assert_eq!(status["status"], "distributed");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_duplicate_never_reopens_completed_job() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;

        let body: Value = dispatch(&client, &base, "https://example.com/u/status/1001")
            .await
            .json()
            .await
            .unwrap();
        let job_id = body["job_id"].as_str().unwrap().to_string();

        report(&client, &base, &job_id, "d1", true, None).await;
        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["status"], "completed");

        let resp = report(&client, &base, &job_id, "d1", false, Some("late")).await;
        assert_eq!(resp.status(), 409);

        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["completed_count"], 1);
        assert_eq!(status["failed_count"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn dispatch_without_live_devices_is_refused() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;

        let resp = dispatch(&client, &base, "https://example.com/u/status/12345").await;
        assert_eq!(resp.status(), 409);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "no_workers_available");
        assert!(err.get("job_id").is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_locator_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;

        let resp = dispatch(&client, &base, "not a locator").await;
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "invalid_target");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bare_long_numeric_locator_uses_fallback_rule() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;

        let resp = dispatch(&client, &base, "99999999999999999").await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["target_id"], "99999999999999999");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn result_for_unknown_assignment_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;

        let body: Value = dispatch(&client, &base, "https://example.com/u/status/555")
            .await
            .json()
            .await
            .unwrap();
        let job_id = body["job_id"].as_str().unwrap().to_string();

        // Device that was never targeted
        let resp = report(&client, &base, &job_id, "ghost", true, None).await;
        assert_eq!(resp.status(), 404);

        // Job that does not exist
        let resp = report(&client, &base, &Uuid::new_v4().to_string(), "d1", true, None).await;
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_job_status_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        let resp = client
            .get(format!("{base}/api/jobs/{}", Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reregistration_updates_in_place() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;

        let resp: Value = client
            .post(format!("{base}/api/devices/register"))
            .json(&json!({
                "device_id": "d1",
                "device_name": "Old Name",
                "account_handle": "acct_old",
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["status"], "registered");

        let resp: Value = client
            .post(format!("{base}/api/devices/register"))
            .json(&json!({
                "device_id": "d1",
                "device_name": "New Name",
                "account_handle": "acct_new",
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["status"], "updated");

        let devices: Value = client
            .get(format!("{base}/api/devices"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(devices["total_devices"], 1);
        assert_eq!(devices["online_devices"][0]["device_name"], "New Name");
        assert_eq!(devices["online_devices"][0]["account_handle"], "acct_new");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn worker_lease_and_ack_flow() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;
        register(&client, &base, "d1").await;

        let body: Value = dispatch(&client, &base, "https://example.com/u/status/314159")
            .await
            .json()
            .await
            .unwrap();
        let job_id = body["job_id"].as_str().unwrap().to_string();

        // Lease the pending message from the device's channel
        let leased: Value = client
            .post(format!("{base}/api/devices/d1/queue/lease"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let msg = &leased["message"];
        assert_eq!(msg["message"]["job_id"].as_str().unwrap(), job_id);
        assert_eq!(msg["message"]["target_id"], "314159");
        assert_eq!(msg["message"]["action"], "like");
        assert_eq!(msg["attempts"], 1);

        // Ack it; the channel drains
        let message_id = msg["message_id"].as_str().unwrap();
        let acked: Value = client
            .post(format!("{base}/api/devices/d1/queue/ack"))
            .json(&json!({ "message_id": message_id }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(acked["acked"], true);

        let empty: Value = client
            .post(format!("{base}/api/devices/d1/queue/lease"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(empty["message"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn concurrent_out_of_order_reports_complete_job_exactly_once() {
    timeout(TEST_TIMEOUT, async {
        let (base, client) = start_server().await;

        let device_ids: Vec<String> = (0..5).map(|i| format!("d{i}")).collect();
        for id in &device_ids {
            register(&client, &base, id).await;
        }

        let body: Value = dispatch(&client, &base, "https://example.com/u/status/424242")
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["devices_targeted"], 5);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        // All devices report concurrently, in no particular order, with
        // mixed outcomes.
        let mut handles = Vec::new();
        for (i, device_id) in device_ids.iter().rev().enumerate() {
            let client = client.clone();
            let base = base.clone();
            let job_id = job_id.clone();
            let device_id = device_id.clone();
            handles.push(tokio::spawn(async move {
                let success = i % 2 == 0;
                let err = (!success).then_some("exec failed");
                report(&client, &base, &job_id, &device_id, success, err)
                    .await
                    .status()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 200);
        }

        let status = job_status(&client, &base, &job_id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["completed_count"], 3);
        assert_eq!(status["failed_count"], 2);
        assert!(
            status["assignments"]
                .as_array()
                .unwrap()
                .iter()
                .all(|a| a["status"] != "assigned")
        );
    })
    .await
    .expect("test timed out");
}
