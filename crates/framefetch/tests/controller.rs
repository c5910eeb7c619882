/// Attach / tick / detach lifecycle.
mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use framefetch::{
    AttachError, Controller, ControllerConfig, EngineError, FailureKind, LifecycleState, PollError,
    InvariantViolation, SubmitError, TransferHandle, TransferOutcome, TransferRequest, UserContext,
};

use common::{ok_response, Plan, ScriptedEngine};

fn config() -> ControllerConfig {
    ControllerConfig {
        event_capacity: 32,
        drain_timeout: Some(Duration::from_secs(5)),
        drain_max_polls: None,
        drain_poll_interval: Duration::ZERO,
    }
}

fn attach() -> Controller<ScriptedEngine> {
    Controller::attach(config(), || Ok(ScriptedEngine::new())).unwrap()
}

fn counter(calls: &Rc<Cell<u32>>) -> impl FnOnce(TransferHandle, TransferOutcome, UserContext) + 'static {
    let calls = calls.clone();
    move |_, _, _| calls.set(calls.get() + 1)
}

#[test]
fn failed_engine_init_fails_attach() {
    let result: Result<Controller<ScriptedEngine>, _> =
        Controller::attach(config(), || Err(EngineError::new("no library")));
    assert!(matches!(result, Err(AttachError::EngineInit(_))));
}

#[test]
fn tick_drives_transfers_to_completion() {
    let mut controller = attach();
    let calls = Rc::new(Cell::new(0));
    controller
        .manager_mut()
        .engine_mut()
        .plan(Plan::SucceedAfter { ticks: 2, status: 200 })
        .plan(Plan::FailAfter { ticks: 1, kind: FailureKind::Connect })
        .plan(Plan::SucceedAfter { ticks: 4, status: 500 });

    for i in 0..3 {
        controller
            .submit(TransferRequest::get(format!("http://example.com/{}", i)), counter(&calls), Box::new(()))
            .unwrap();
    }

    let mut ticks = 0;
    while !controller.manager().is_all_transfers_completed() {
        controller.poll(Instant::now()).unwrap();
        ticks += 1;
    }
    assert_eq!(ticks, 4);
    assert_eq!(calls.get(), 3);

    let report = controller.detach();
    assert_eq!(report.discarded, 0);
    assert_eq!(report.polls, 0);
    assert!(!report.budget_exhausted);
}

#[test]
fn detach_drains_in_flight_transfer() {
    let mut controller = attach();
    let calls = Rc::new(Cell::new(0));
    controller
        .manager_mut()
        .engine_mut()
        .plan(Plan::SucceedAfter { ticks: 3, status: 200 });
    controller
        .submit(TransferRequest::get("http://example.com/slow"), counter(&calls), Box::new(()))
        .unwrap();

    let report = controller.detach();
    assert_eq!(calls.get(), 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.discarded, 0);
    assert_eq!(report.polls, 3);
    assert!(!report.budget_exhausted);
}

#[test]
fn detach_discards_stuck_transfer_once_budget_is_spent() {
    let mut cfg = config();
    cfg.drain_max_polls = Some(10);
    let mut controller = Controller::attach(cfg, || Ok(ScriptedEngine::new())).unwrap();
    let calls = Rc::new(Cell::new(0));
    controller.manager_mut().engine_mut().plan(Plan::Stall);
    controller
        .submit(TransferRequest::get("http://example.com/hang"), counter(&calls), Box::new(()))
        .unwrap();

    let report = controller.detach();
    assert!(report.budget_exhausted);
    assert_eq!(report.polls, 10);
    assert_eq!(report.discarded, 1);
    assert_eq!(calls.get(), 0);
}

#[test]
fn detach_respects_wall_clock_budget() {
    let mut cfg = config();
    cfg.drain_timeout = Some(Duration::from_millis(20));
    cfg.drain_poll_interval = Duration::from_millis(1);
    let mut controller = Controller::attach(cfg, || Ok(ScriptedEngine::new())).unwrap();
    controller.manager_mut().engine_mut().plan(Plan::Stall);
    let calls = Rc::new(Cell::new(0));
    controller
        .submit(TransferRequest::get("http://example.com/hang"), counter(&calls), Box::new(()))
        .unwrap();

    let report = controller.detach();
    assert!(report.budget_exhausted);
    assert!(report.elapsed >= Duration::from_millis(20));
    assert_eq!(report.discarded, 1);
    assert_eq!(calls.get(), 0);
}

#[test]
fn invariant_violation_halts_the_controller() {
    let mut controller = attach();
    let calls = Rc::new(Cell::new(0));
    controller.manager_mut().engine_mut().plan(Plan::Stall);
    controller
        .submit(TransferRequest::get("http://example.com"), counter(&calls), Box::new(()))
        .unwrap();
    controller
        .manager_mut()
        .engine_mut()
        .inject_finished(TransferHandle::new(4242), Ok(ok_response("http://example.com", 200)));

    let err = controller.poll(Instant::now()).unwrap_err();
    assert!(matches!(err, PollError::Invariant(_)));
    assert_eq!(controller.state(), LifecycleState::Halted);

    assert!(matches!(controller.poll(Instant::now()), Err(PollError::Halted)));
    let submit = controller.submit(TransferRequest::get("http://example.com"), counter(&calls), Box::new(()));
    assert!(matches!(submit, Err(SubmitError::ShuttingDown)));

    // Detach skips the drain and sweeps what is left.
    let report = controller.detach();
    assert_eq!(report.polls, 0);
    assert_eq!(report.discarded, 1);
    assert_eq!(calls.get(), 0);
}

#[test]
fn halted_controller_does_not_touch_the_engine() {
    let mut controller = attach();
    controller
        .manager_mut()
        .engine_mut()
        .inject_finished(TransferHandle::new(1), Ok(ok_response("http://example.com", 200)));
    assert!(controller.poll(Instant::now()).is_err());

    let timer_calls = controller.manager().engine().timer_calls;
    let _ = controller.poll(Instant::now());
    assert_eq!(controller.manager().engine().timer_calls, timer_calls);
}

#[test]
fn reused_live_handle_halts_and_keeps_the_live_task() {
    let mut controller = attach();
    let calls = Rc::new(Cell::new(0));
    controller.manager_mut().engine_mut().plan(Plan::Stall);
    let live = controller
        .submit(TransferRequest::get("http://example.com/live"), counter(&calls), Box::new(()))
        .unwrap();

    controller.manager_mut().engine_mut().reuse_next = Some(live);
    let err = controller
        .submit(TransferRequest::get("http://example.com/dup"), counter(&calls), Box::new(()))
        .unwrap_err();
    assert!(matches!(err, SubmitError::Invariant(InvariantViolation::HandleReused(h)) if h == live));
    assert_eq!(controller.state(), LifecycleState::Halted);

    // The rejected submission left no task; the live one is untouched.
    assert_eq!(controller.manager().active_count(), 1);
    assert_eq!(controller.manager().stats().submitted, 1);
    assert!(controller.manager().contains(live));
    assert!(matches!(
        controller.submit(TransferRequest::get("http://example.com"), counter(&calls), Box::new(())),
        Err(SubmitError::ShuttingDown)
    ));

    let report = controller.detach();
    assert_eq!(report.discarded, 1);
    assert_eq!(calls.get(), 0);
}
