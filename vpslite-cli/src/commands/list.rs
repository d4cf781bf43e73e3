use clap::Args;

use crate::output;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only list instances belonging to this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Include deleted and failed instances
    #[arg(short, long)]
    pub all: bool,

    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ListArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.runtime()?;
    let views = if args.all {
        runtime.list_all(args.owner.as_deref())
    } else {
        runtime.list_vps(args.owner.as_deref())
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else {
        println!("{}", output::instance_table(&views));
    }
    Ok(())
}
