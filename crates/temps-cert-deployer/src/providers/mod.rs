//! Built-in vendor adapters

pub mod credentials;
pub mod flyio;
pub mod synology_dsm;
pub mod tencentcloud_eo;
mod volcengine;
pub mod volcengine_live;
pub mod volcengine_vod;

pub use credentials::{
    FlyioCredentials, SynologyDsmCredentials, TencentCloudCredentials, VolcengineCredentials,
};
pub use flyio::{FlyioConfig, FlyioDeployer};
pub use synology_dsm::{SynologyDsmConfig, SynologyDsmDeployer};
pub use tencentcloud_eo::{TencentCloudEoConfig, TencentCloudEoDeployer};
pub use volcengine_live::{VolcengineLiveConfig, VolcengineLiveDeployer};
pub use volcengine_vod::{VodDomainType, VolcengineVodConfig, VolcengineVodDeployer};
