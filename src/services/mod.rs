//! 服务层模块
//!
//! 切换控制器与镜像保留回收器

pub mod cutover;
pub mod retention;
