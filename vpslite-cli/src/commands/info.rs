use clap::Args;
use vpslite::InstanceId;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// ID of the instance
    pub id: String,

    /// Print the view as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: InfoArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.runtime()?;
    let id = InstanceId::parse(&args.id)?;
    let view = runtime.get_vps_info(&id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("id:       {}", view.id);
        println!("owner:    {}", view.owner_id);
        println!("state:    {}", view.state);
        println!("image:    {}", view.os_image);
        println!("endpoint: {}:{}", view.host, view.port);
        println!("username: {}", view.username);
        println!("backend:  {}", view.backend_kind);
        println!("created:  {}", view.created_at.to_rfc3339());
        println!("updated:  {}", view.last_updated.to_rfc3339());
    }
    Ok(())
}
