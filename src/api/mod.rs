pub mod capi_cluster;
pub mod labels;
