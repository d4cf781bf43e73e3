use comfy_table::{presets, Table};
use vpslite::InstanceView;

/// Render instance views as a table: ID, OWNER, IMAGE, STATE, ENDPOINT.
pub fn instance_table(views: &[InstanceView]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["ID", "OWNER", "IMAGE", "STATE", "ENDPOINT"]);
    for view in views {
        table.add_row(vec![
            view.id.to_string(),
            view.owner_id.clone(),
            view.os_image.clone(),
            view.state.to_string(),
            format!("{}:{}", view.host, view.port),
        ]);
    }
    table
}
