//! Behavioural tests covering the order and effects of the boot stages.

use std::cell::RefCell;

use axon_config::TransportKind;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::boot::ApplyMode;
use crate::exit::listen_failure_code;
use crate::tests::support::{BootWorld, IdentityCall};
use crate::transport::ListenerState;

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<BootWorld> {
    RefCell::new(BootWorld::new())
}

#[given("a service daemon with a listener, a pid file and a file store")]
fn given_service(world: &RefCell<BootWorld>) {
    world.borrow_mut().configure_service();
}

#[given("the daemon detaches into the background")]
fn given_detached(world: &RefCell<BootWorld>) {
    world.borrow_mut().detach();
}

#[given("the listener port is already in use")]
fn given_busy_port(world: &RefCell<BootWorld>) {
    world.borrow_mut().occupy_listener_port();
}

#[given("the daemon switches to user \"{user}\" and group \"{group}\"")]
fn given_identity(world: &RefCell<BootWorld>, user: String, group: String) {
    let mut world = world.borrow_mut();
    world.config.uid = Some(user);
    world.config.gid = Some(group);
}

#[when("the daemon boots in full mode")]
fn when_full_boot(world: &RefCell<BootWorld>) {
    world.borrow_mut().boot(ApplyMode::Full);
}

#[when("the daemon boots in tooling mode")]
fn when_tooling_boot(world: &RefCell<BootWorld>) {
    world.borrow_mut().boot(ApplyMode::Tooling);
}

#[then("the finished stages are \"{stages}\"")]
fn then_stages(world: &RefCell<BootWorld>, stages: String) -> StepResult {
    let finished = world
        .borrow()
        .reporter
        .finished_stages()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if finished == stages {
        Ok(())
    } else {
        Err(format!("expected stages '{stages}', got '{finished}'"))
    }
}

#[then("daemonisation was requested for \"{name}\"")]
fn then_daemonised(world: &RefCell<BootWorld>, name: String) {
    let calls = world.borrow().daemonizer.calls();
    assert_eq!(calls.len(), 1, "daemonisation requested once");
    assert_eq!(calls.first().map(|(daemon, _)| daemon.as_str()), Some(name.as_str()));
}

#[then("the pid file exists")]
fn then_pid_file(world: &RefCell<BootWorld>) {
    let world = world.borrow();
    let path = world.config.pid_file.clone().expect("pid file configured");
    let content = std::fs::read_to_string(&path).expect("pid file written");
    assert_eq!(content.trim(), std::process::id().to_string());
}

#[then("the listener \"{name}\" is listening")]
fn then_listening(world: &RefCell<BootWorld>, name: String) {
    let world = world.borrow();
    let listener = world.booted().listeners().get(&name).expect("listener managed");
    assert_eq!(listener.state(), ListenerState::Listening);
    assert!(listener.local_addr().is_some());
}

#[then("no listener is bound")]
fn then_no_listener(world: &RefCell<BootWorld>) {
    assert!(world.borrow().booted().listeners().is_empty());
}

#[then("the store \"{name}\" is open")]
fn then_store_open(world: &RefCell<BootWorld>, name: String) {
    let world = world.borrow();
    let stores = world.booted().stores().expect("stores applied");
    assert!(stores.is_open(&name));
}

#[then("the boot fails with the exit code of the busy port")]
fn then_busy_exit(world: &RefCell<BootWorld>) -> StepResult {
    let world = world.borrow();
    let port = world.busy_port().ok_or("no port was occupied")?;
    let error = world.error().ok_or("boot succeeded on a busy port")?;
    let expected = listen_failure_code(TransportKind::Tcp4, port);
    if error.exit_code() == expected {
        Ok(())
    } else {
        Err(format!("expected exit code {expected}, got {}", error.exit_code()))
    }
}

#[then("the identity changed groups first, then the group, then the user")]
fn then_identity_order(world: &RefCell<BootWorld>) {
    assert_eq!(
        world.borrow().privileges.calls(),
        vec![
            IdentityCall::Groups(Vec::new()),
            IdentityCall::Gid(0),
            IdentityCall::Uid(0),
        ]
    );
}

#[scenario(
    path = "tests/features/boot_sequence.feature",
    name = "Stages run in a fixed order"
)]
fn stages_run_in_order(#[from(world)] _: RefCell<BootWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(
    path = "tests/features/boot_sequence.feature",
    name = "Tooling mode only configures logging and stores"
)]
fn tooling_mode_skips_process_stages(#[from(world)] _: RefCell<BootWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(
    path = "tests/features/boot_sequence.feature",
    name = "A busy port aborts the boot"
)]
fn busy_port_aborts_boot(#[from(world)] _: RefCell<BootWorld>) -> Result<(), String> {
    Ok(())
}

#[scenario(
    path = "tests/features/boot_sequence.feature",
    name = "Privileges are dropped after listeners bind"
)]
fn privileges_drop_after_listeners(#[from(world)] _: RefCell<BootWorld>) -> Result<(), String> {
    Ok(())
}
