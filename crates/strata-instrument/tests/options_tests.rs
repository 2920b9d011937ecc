mod common;

use common::*;
use strata_instrument::{InstrumentationOptions, MoverType, YieldingProc};
use strata_ir::{Block, Cmd, CmdId};

#[test]
fn options_default_to_checked_noninterference() {
    let options: InstrumentationOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, InstrumentationOptions::default());
    assert!(!options.trust_noninterference);
}

#[test]
fn options_load_from_json() {
    let options: InstrumentationOptions =
        serde_json::from_str(r#"{ "trust_noninterference": true }"#).unwrap();
    assert_eq!(options, InstrumentationOptions::trusted());

    let json = serde_json::to_string(&options).unwrap();
    assert_eq!(json, r#"{"trust_noninterference":true}"#);
}

#[test]
fn layer_summary_serializes_to_json() {
    let mut fx = Fixture::new(vec![int("x")]);
    fx.add_yielding(
        implementation("Worker", vec![Block::returning("A", vec![Cmd::Yield(CmdId(1))])]),
        YieldingProc::mover(MoverType::Non, 2),
    );

    let output = fx.run(1).unwrap();
    let value = serde_json::to_value(&output.summary).unwrap();

    assert_eq!(value["layer"], 1);
    assert_eq!(value["transformed_implementations"][0], "Worker_dup");
    assert_eq!(value["dispatcher"], "NoninterferenceDispatcher_1");
    assert_eq!(
        value["noninterference_checkers"],
        serde_json::json!([
            "NoninterferenceChecker_impl_Worker_dup",
            "NoninterferenceChecker_proc_Worker"
        ])
    );
}
