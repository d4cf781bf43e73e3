use clap::Args;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Also purge terminal records past their retention window
    #[arg(long)]
    pub purge: bool,
}

pub async fn execute(args: ReconcileArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.runtime()?;

    let repaired = runtime.reconcile().await;
    println!("repaired: {}", repaired);

    if args.purge {
        let purged = runtime.purge_expired()?;
        println!("purged:   {}", purged);
    }
    Ok(())
}
