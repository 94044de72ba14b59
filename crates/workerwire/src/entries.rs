//! Entry points built into `workerwire worker`.

use workerwire_frame::Value;
use workerwire_worker::{EntryRegistry, Transport, WorkerContext};

pub fn registry() -> EntryRegistry {
    EntryRegistry::new()
        .register("echo", echo)
        .register("count", count)
        .register("fail", fail)
        .register_with_transport("probe-transport", probe_transport)
}

/// Send every received value back.
fn echo(ctx: &mut WorkerContext) -> anyhow::Result<()> {
    while let Some(value) = ctx.try_recv()? {
        ctx.send(&value)?;
    }
    Ok(())
}

/// Number each received value, starting at the first argument (default 0),
/// then report the total as `(count N)`.
fn count(ctx: &mut WorkerContext) -> anyhow::Result<()> {
    let start = ctx.args().first().and_then(Value::as_int).unwrap_or(0);
    let mut seen = 0i64;
    while let Some(value) = ctx.try_recv()? {
        let n = start
            .checked_add(seen)
            .ok_or_else(|| anyhow::anyhow!("count overflowed past {}", i64::MAX))?;
        ctx.send(&Value::list([Value::Int(n), value]))?;
        seen += 1;
    }
    ctx.send(&Value::list([Value::symbol("count"), Value::Int(seen)]))?;
    Ok(())
}

/// Fail with the first argument as the message.
fn fail(ctx: &mut WorkerContext) -> anyhow::Result<()> {
    let reason = ctx
        .args()
        .first()
        .and_then(Value::as_str)
        .unwrap_or("requested failure")
        .to_string();
    anyhow::bail!(reason)
}

/// Report the transport kind, then echo.
fn probe_transport(ctx: &mut WorkerContext, transport: &mut dyn Transport) -> anyhow::Result<()> {
    ctx.send(&Value::list([
        Value::symbol("transport"),
        Value::string(transport.kind()),
    ]))?;
    echo(ctx)
}
