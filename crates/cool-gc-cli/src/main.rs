use anyhow::{Result, anyhow, bail};
use clap::Parser;
use cool_gc::{
    Address, Collector, Gc, GcConfig, Klass, ObjectRef, ObjectType, RuntimeFlags, flags,
};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(
    name = "coolgc",
    version,
    about = "Drive the Cool garbage collector with a linked-list workload"
)]
struct Cli {
    /// Number of list nodes to allocate
    #[arg(long, default_value_t = 1000)]
    objects: usize,

    /// Keep every n-th node reachable; the rest become garbage
    #[arg(long, default_value_t = 4)]
    keep_every: usize,

    /// Extra payload fields per node
    #[arg(long, default_value_t = 0)]
    fields: usize,

    /// Runtime flags: `+Flag`, `-Flag` or `Name=value`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    runtime_flags: Vec<String>,
}

// Node fields: boxed value, next node, payload.
const VALUE: usize = 0;
const NEXT: usize = 1;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    if cli.keep_every == 0 {
        bail!("--keep-every must be at least 1");
    }

    let runtime_flags = RuntimeFlags::process_runtime_args(
        std::iter::once("coolgc").chain(cli.runtime_flags.iter().map(String::as_str)),
    )?;
    flags::install(runtime_flags).map_err(|_| anyhow!("runtime flags already installed"))?;

    let config = GcConfig::from_flags(flags::global())?;
    tracing::info!(
        heap_size = config.heap_size,
        algorithm = ?config.algorithm,
        "starting collector"
    );
    let mut gc = Collector::from_config(&config)?;

    let kept = run_workload(&mut gc, &cli)?;

    let stats = gc.stats();
    tracing::info!(
        kept,
        allocations = stats.allocations,
        allocated_bytes = stats.allocated_bytes,
        collections = stats.collections,
        total_reclaimed = stats.total_reclaimed,
        total_pause_us = stats.total_pause.as_micros() as u64,
        free_bytes = gc.free_bytes(),
        "workload finished"
    );

    let mut census: Vec<(i32, usize)> = gc.heap_census().into_iter().collect();
    census.sort_unstable();
    for (tag, count) in census {
        let ty = ObjectType::from_tag(tag).map_or_else(|| tag.to_string(), |ty| format!("{ty:?}"));
        tracing::info!(ty = %ty, count, "heap census");
    }

    Ok(())
}

/// Build a list of boxed integers, dropping all but every `keep_every`-th
/// node, then check the survivors. Returns the list length.
fn run_workload<G: Gc>(gc: &mut G, cli: &Cli) -> Result<usize> {
    let int = Klass::new(1, ObjectType::Integer);
    let node = Klass::new(2 + cli.fields, ObjectType::Other);

    let mut scope = gc.enter_scope();
    let head = scope.reg_root(std::ptr::null_mut());

    for i in 0..cli.objects {
        let mut frame = scope.enter_scope();

        let value = new_object(&mut *frame, &int)?;
        unsafe { frame.write(value, int.offset(0), i as i64) };
        frame.reg_root(value);

        let cell = new_object(&mut *frame, &node)?;
        let next = if i % cli.keep_every == 0 {
            frame.parent().map_or(std::ptr::null_mut(), |p| p.root(head))
        } else {
            std::ptr::null_mut()
        };
        unsafe {
            frame.write(cell, node.offset(VALUE), value);
            frame.write(cell, node.offset(NEXT), next);
        }

        drop(frame);
        if i % cli.keep_every == 0 {
            scope.set_root(head, cell);
        }
    }

    // Walk the list from the newest node back to node 0.
    let mut expected = (cli.objects.saturating_sub(1) / cli.keep_every * cli.keep_every) as i64;
    let mut len = 0;
    let mut cursor = scope.root(head);
    while !cursor.is_null() {
        let value: Address = unsafe { scope.read(cursor, node.offset(VALUE)) };
        let got: i64 = unsafe { scope.read(value, int.offset(0)) };
        if got != expected {
            bail!("list corrupted: node {len} holds {got}, expected {expected}");
        }
        expected -= cli.keep_every as i64;
        len += 1;
        cursor = unsafe { scope.read(cursor, node.offset(NEXT)) };
    }

    Ok(len)
}

fn new_object<G: Gc>(gc: &mut G, klass: &Klass) -> Result<Address> {
    let addr = gc.try_allocate(klass)?;
    // SAFETY: freshly allocated by `gc`
    unsafe { ObjectRef::from_address(addr) }.zero_fields(0);
    Ok(addr)
}
