pub mod codegen;
pub mod deployer;
pub mod sanitize;

pub use codegen::CodegenClient;
pub use deployer::DeployClient;
