//! Integration tests for the message channel across real forked processes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serial_test::serial;

use kettle::error::KettleError;
use kettle::ipc::channel::{PipePair, Role};
use kettle::process::{self, ChildExit, Forked};

// ---------------------------------------------------------------------------
// Framing across a fork
// ---------------------------------------------------------------------------

#[test]
#[serial]
fn values_echoed_by_a_child_arrive_intact() {
    let pipes = PipePair::new().unwrap();
    let pid = match process::fork().unwrap() {
        Forked::Child => process::run_child(|| {
            let mut channel = pipes.bind(Role::Callee);
            while let Ok(Some(value)) = channel.receive::<serde_json::Value>() {
                if channel.send(&value).is_err() {
                    return 1;
                }
            }
            0
        }),
        Forked::Parent(pid) => pid,
    };
    let mut channel = pipes.bind(Role::Caller);

    let mut nested = BTreeMap::new();
    nested.insert("lines", serde_json::json!(["a\nb", "c"]));
    nested.insert("deep", serde_json::json!({"x": {"y": [1, 2, {"z": null}]}}));
    let values = vec![
        serde_json::json!(42),
        serde_json::json!("tab\tand\nnewline"),
        serde_json::json!([1.5, true, null]),
        serde_json::to_value(&nested).unwrap(),
    ];

    for value in &values {
        channel.send(value).unwrap();
        let echoed: serde_json::Value = channel.receive().unwrap().unwrap();
        assert_eq!(&echoed, value);
    }

    drop(channel);
    assert_eq!(process::wait_for(pid).unwrap(), ChildExit::Exited(0));
}

// ---------------------------------------------------------------------------
// End of stream
// ---------------------------------------------------------------------------

#[test]
#[serial]
fn child_exiting_without_reply_reads_as_closed() {
    let pipes = PipePair::new().unwrap();
    let pid = match process::fork().unwrap() {
        Forked::Child => process::run_child(|| {
            let mut channel = pipes.bind(Role::Callee);
            let _ = channel.receive::<String>();
            3
        }),
        Forked::Parent(pid) => pid,
    };
    let mut channel = pipes.bind(Role::Caller);

    channel.send(&"are you there?").unwrap();
    assert_eq!(channel.receive::<String>().unwrap(), None);
    assert_eq!(process::wait_for(pid).unwrap(), ChildExit::Exited(3));
}

#[test]
#[serial]
fn killing_a_hung_child_unblocks_the_reader() {
    let pipes = PipePair::new().unwrap();
    let pid = match process::fork().unwrap() {
        Forked::Child => process::run_child(|| {
            let _channel = pipes.bind(Role::Callee);
            std::thread::sleep(Duration::from_secs(60));
            0
        }),
        Forked::Parent(pid) => pid,
    };
    let mut channel = pipes.bind(Role::Caller);

    // Nothing arrives while the child is alive.
    let err = channel
        .receive_timeout::<String>(Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, KettleError::Timeout { .. }));

    let started = Instant::now();
    process::kill_and_reap(pid).unwrap();
    assert_eq!(channel.receive::<String>().unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
#[serial]
fn sending_to_a_dead_child_is_channel_closed() {
    let pipes = PipePair::new().unwrap();
    let pid = match process::fork().unwrap() {
        Forked::Child => process::run_child(|| {
            drop(pipes.bind(Role::Callee));
            0
        }),
        Forked::Parent(pid) => pid,
    };
    let mut channel = pipes.bind(Role::Caller);
    process::wait_for(pid).unwrap();

    let err = channel.send(&"hello").unwrap_err();
    assert!(matches!(err, KettleError::ChannelClosed));
}
