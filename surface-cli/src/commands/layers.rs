use anyhow::Result;

use super::Session;

pub fn run(session: &Session) -> Result<()> {
    let layers = session.router.registry().layers();
    if layers.is_empty() {
        println!("No surface layers found");
        return Ok(());
    }

    println!("{:>4} {:<20} {:>44}", "ID", "NAME", "EXTENT");
    println!("{}", "-".repeat(70));

    for layer in layers {
        let extent = layer
            .extent
            .map(|e| format!("{:.4}, {:.4}, {:.4}, {:.4}", e.xmin, e.ymin, e.xmax, e.ymax))
            .unwrap_or_else(|| "-".to_string());
        println!("{:>4} {:<20} {:>44}", layer.id, layer.name, extent);
    }

    println!("{}", "-".repeat(70));
    println!(
        "Total: {} layers (wkid {})",
        layers.len(),
        layers
            .iter()
            .map(|l| l.model.spatial_reference.wkid.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}
