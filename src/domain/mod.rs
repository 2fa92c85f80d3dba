// Domain layer: observation/assessment models and ports. No engine logic here.

pub mod model;
pub mod ports;
