//! End-to-end tests of the request lifecycle over script-backed sandboxes.

mod common;

use std::time::Duration;

use pyexec_mcp::output::{ExecutionStatus, OutputRecord};

use common::{request, TestRig, HELLO_SCRIPT};

#[tokio::test]
async fn test_successful_execution_yields_text_records() {
    let rig = TestRig::new(HELLO_SCRIPT);

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("print('hi')"))
        .await
        .expect("execution failed");

    assert!(matches!(result.status, ExecutionStatus::Completed));
    assert!(!result.truncated);
    assert!(result.failure.is_none());
    assert_eq!(
        result.records,
        vec![OutputRecord::Text(String::from("hi\n"))]
    );
    assert_eq!(rig.launches(), 1);
}

#[tokio::test]
async fn test_guest_exception_is_an_error_record_not_a_failure() {
    const RAISING: &str = r#"cat > /dev/null
printf '%s\n' '{"type":"error","data":"ZeroDivisionError: division by zero"}' '{"type":"end"}'"#;
    let rig = TestRig::new(RAISING);

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("1/0"))
        .await
        .expect("execution failed");

    // Guest errors complete the protocol normally; only the record kind differs.
    assert!(matches!(result.status, ExecutionStatus::Completed));
    assert_eq!(
        result.records,
        vec![OutputRecord::Error(String::from(
            "ZeroDivisionError: division by zero"
        ))]
    );
}

#[tokio::test]
async fn test_image_records_are_preserved_in_order() {
    const PLOTTING: &str = r#"cat > /dev/null
printf '%s\n' '{"type":"text","data":"plotting\n"}' '{"type":"image","data":"aGVsbG8="}' '{"type":"end"}'"#;
    let rig = TestRig::new(PLOTTING);

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("plt.show()"))
        .await
        .expect("execution failed");

    assert_eq!(
        result.records,
        vec![
            OutputRecord::Text(String::from("plotting\n")),
            OutputRecord::Image(String::from("aGVsbG8=")),
        ]
    );
}

#[tokio::test]
async fn test_timeout_preserves_partial_output() {
    const STALLING: &str = r#"cat > /dev/null
printf '%s\n' '{"type":"text","data":"tick\n"}'
sleep 30"#;
    let rig = TestRig::new(STALLING);

    let result = rig
        .orchestrator
        .execute(
            Some(&rig.token),
            &request("while True: pass").with_deadline(Duration::from_millis(300)),
        )
        .await
        .expect("execution failed");

    assert!(matches!(result.status, ExecutionStatus::TimedOut));
    assert_eq!(
        result.records,
        vec![OutputRecord::Text(String::from("tick\n"))]
    );
}

#[tokio::test]
async fn test_oversized_output_is_truncated() {
    const VERBOSE: &str = r#"cat > /dev/null
big=$(printf 'x%.0s' $(seq 1 200))
printf '{"type":"text","data":"%s"}\n' "$big" "$big"
printf '%s\n' '{"type":"end"}'"#;
    let rig = TestRig::new(VERBOSE);

    let result = rig
        .orchestrator
        .execute(
            Some(&rig.token),
            &request("print('x' * 400)").with_output_budget(250),
        )
        .await
        .expect("execution failed");

    assert!(result.truncated);
    assert!(matches!(result.status, ExecutionStatus::Completed));
    assert_eq!(result.records.len(), 1, "second record is over budget");
}

#[tokio::test]
async fn test_malformed_sandbox_output_is_a_failure() {
    let rig = TestRig::new("cat > /dev/null; echo 'this is not a protocol frame'");

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("pass"))
        .await
        .expect("execution failed");

    assert!(matches!(result.status, ExecutionStatus::Failed));
    assert!(result.failure.is_some());
}

#[tokio::test]
async fn test_sandbox_dying_early_is_a_failure() {
    // Stream ends without the end-of-execution marker.
    let rig = TestRig::new(r#"printf '%s\n' '{"type":"text","data":"partial"}'"#);

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("pass"))
        .await
        .expect("execution failed");

    assert!(matches!(result.status, ExecutionStatus::Failed));
    assert_eq!(
        result.records,
        vec![OutputRecord::Text(String::from("partial"))],
        "output before the crash is still surfaced"
    );
}

#[tokio::test]
async fn test_each_request_gets_a_fresh_sandbox() {
    let rig = TestRig::new(HELLO_SCRIPT);

    for _ in 0..3 {
        rig.orchestrator
            .execute(Some(&rig.token), &request("print('hi')"))
            .await
            .expect("execution failed");
    }

    assert_eq!(rig.launches(), 3);
}
