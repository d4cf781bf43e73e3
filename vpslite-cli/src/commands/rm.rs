use clap::Args;
use vpslite::InstanceId;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// ID of the instance(s) to delete
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: RmArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.runtime()?;

    let mut active_error = false;
    for target in args.targets {
        let outcome = match InstanceId::parse(&target) {
            Ok(id) => runtime.delete_vps(&id).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                if !result.deleted {
                    eprintln!("{}: already deleted", target);
                }
                println!("{}", target);
            }
            Err(e) => {
                eprintln!("Error deleting instance '{}': {}", target, e);
                active_error = true;
            }
        }
    }

    if active_error {
        anyhow::bail!("Some instances could not be deleted");
    }
    Ok(())
}
