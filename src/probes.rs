//! Built-in probe suite.
//!
//! Each probe declares the capability set it runs under, checks that the granted capabilities work, and that
//! everything outside the set is denied. The suite is what `permatrix matrix` sweeps when no other suite is linked in.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use permatrix_core::{Capability, CapabilitySet};
use permatrix_testing::assertions::{assert_eq, assert_true, fail};
use permatrix_testing::{TestContext, TestOutcome, TestSuite};

/// The probe suite.
pub fn suite() -> TestSuite {
    let read = CapabilitySet::from_grants([Capability::Read]);
    let read_write = read.with(Capability::Write);
    let env = CapabilitySet::from_grants([Capability::Environment]);
    let net = CapabilitySet::from_grants([Capability::Network]);
    let hrtime = CapabilitySet::from_grants([Capability::HighResTimer]);
    let subprocess = CapabilitySet::from_grants([Capability::Subprocess, Capability::Read]);
    let plugin = CapabilitySet::from_grants([Capability::Plugin]);

    TestSuite::new()
        .test("no_capabilities_denies_everything", CapabilitySet::none(), denies_everything)
        .test("no_capabilities_hides_environment", CapabilitySet::none(), hides_environment)
        .test("read_temp_dir_metadata", read, read_temp_dir)
        .test("read_denies_write", read, read_denies_write)
        .test("read_write_temp_file", read_write, write_temp_file)
        .test("environment_reads_path", env, reads_path)
        .test("network_binds_loopback", net, binds_loopback)
        .test("high_res_timer_is_monotonic", hrtime, timer_is_monotonic)
        .test("subprocess_is_granted", subprocess, subprocess_granted)
        .test("plugin_is_granted", plugin, plugin_granted)
        .test("all_capabilities_granted", CapabilitySet::all(), all_granted)
}

/// Every capability outside the context's set must be refused.
fn denies_ungranted(ctx: &TestContext) -> TestOutcome {
    let granted = ctx.capabilities();
    for cap in Capability::ALL {
        if !granted.grants(cap) && ctx.require(cap).is_ok() {
            return fail(&format!("'{cap}' was allowed without being granted"));
        }
    }
    Ok(())
}

fn denies_everything(ctx: &TestContext) -> TestOutcome {
    assert_eq(ctx.capabilities(), CapabilitySet::none())?;
    denies_ungranted(ctx)
}

fn hides_environment(ctx: &TestContext) -> TestOutcome {
    assert_true(ctx.env_var("PATH").is_err(), "environment read was not denied")
}

fn read_temp_dir(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::Read).map_err(|e| e.to_string())?;
    let meta = std::fs::metadata(std::env::temp_dir()).map_err(|e| e.to_string())?;
    assert_true(meta.is_dir(), "temp dir is not a directory")?;
    denies_ungranted(ctx)
}

fn read_denies_write(ctx: &TestContext) -> TestOutcome {
    match ctx.require(Capability::Write) {
        Ok(()) => fail("write was allowed under a read-only grant"),
        Err(denied) => assert_eq(denied.capability, Capability::Write),
    }
}

fn write_temp_file(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::Write).map_err(|e| e.to_string())?;
    ctx.require(Capability::Read).map_err(|e| e.to_string())?;

    let path = std::env::temp_dir().join(format!("permatrix_probe_{}.txt", std::process::id()));
    std::fs::write(&path, "probe").map_err(|e| e.to_string())?;
    let contents = std::fs::read_to_string(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq(contents.map_err(|e| e.to_string())?.as_str(), "probe")
}

fn reads_path(ctx: &TestContext) -> TestOutcome {
    // PATH may legitimately be unset; only the gate is under test.
    ctx.env_var("PATH").map_err(|e| e.to_string())?;
    denies_ungranted(ctx)
}

fn binds_loopback(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::Network).map_err(|e| e.to_string())?;
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| e.to_string())?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;
    assert_true(addr.port() != 0, "listener has no port")
}

fn timer_is_monotonic(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::HighResTimer).map_err(|e| e.to_string())?;
    let start = Instant::now();
    std::thread::sleep(Duration::from_millis(1));
    assert_true(start.elapsed() >= Duration::from_millis(1), "clock went backwards")
}

fn subprocess_granted(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::Subprocess).map_err(|e| e.to_string())?;
    assert_true(ctx.require(Capability::Network).is_err(), "network leaked into subprocess grant")
}

fn plugin_granted(ctx: &TestContext) -> TestOutcome {
    ctx.require(Capability::Plugin).map_err(|e| e.to_string())?;
    denies_ungranted(ctx)
}

fn all_granted(ctx: &TestContext) -> TestOutcome {
    for cap in Capability::ALL {
        ctx.require(cap).map_err(|e| e.to_string())?;
    }
    Ok(())
}
