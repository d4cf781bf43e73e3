use clap::Args;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Owner the instance is created for
    pub owner: String,

    /// OS image to provision (e.g. ubuntu:22.04)
    pub image: String,

    /// RAM limit, e.g. 512m or 2g
    #[arg(long)]
    pub ram: Option<String>,

    /// Disk size hint, e.g. 5g
    #[arg(long)]
    pub disk: Option<String>,

    /// Print the connection descriptor as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: CreateArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.runtime()?;
    let info = runtime
        .create_vps(&args.owner, &args.image, args.ram.as_deref(), args.disk.as_deref())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("id:       {}", info.id);
        println!("host:     {}", info.host);
        println!("port:     {}", info.port);
        println!("username: {}", info.username);
        println!("password: {}", info.password);
        println!("ssh:      ssh {}@{} -p {}", info.username, info.host, info.port);
    }
    Ok(())
}
