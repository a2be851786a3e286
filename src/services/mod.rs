//! 服务模块
//!
//! 部署编排逻辑

pub mod deployer;

pub use deployer::{Deployer, DeployerOptions};
