use std::error::Error;

use super::PositionedTopology;

pub fn render(topology: &PositionedTopology) -> Result<String, Box<dyn Error>> {
    let context = super::renderer::create_standard_context(topology);
    Ok(serde_json::to_string_pretty(&context)?)
}
