//! 依赖包检查：要求指定包已就位，否则整个运行以依赖缺失中止

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Component;
use crate::core::{RunContext, VcError};
use crate::profile::ComponentDescriptor;

pub struct DependencyPackage {
    descriptor: ComponentDescriptor,
    package: String,
}

impl DependencyPackage {
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let package = descriptor.parameters.require_string("PackageName")?;
        Ok(Self { descriptor, package })
    }
}

#[async_trait]
impl Component for DependencyPackage {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, _ct: &CancellationToken) -> Result<(), VcError> {
        let package = ctx.packages.require_package(&self.package).await?;
        tracing::info!(
            package = %package.name,
            path = %package.platform_path(&ctx.platform).display(),
            "dependency package present"
        );
        Ok(())
    }
}
