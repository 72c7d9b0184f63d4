//! 认证与授权
//!
//! - [`password`]：argon2 密码哈希
//! - [`token`]：HS256 JWT 签发与校验
//! - [`policy`]：基于角色和所有权的访问策略

pub mod password;
pub mod policy;
pub mod token;

pub use policy::{authorize, Action, Actor};
pub use token::{Claims, TokenIssuer};
