use std::error::Error;

use super::PositionedTopology;

pub fn render(topology: &PositionedTopology) -> Result<String, Box<dyn Error>> {
    super::renderer::render_template(topology, &get_template())
}

pub fn get_template() -> String {
    include_str!("to_dot.hbs").to_string()
}
