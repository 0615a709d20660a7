//! # Navigation Client Library
//!
//! Async client for the navigation server. Game servers embed [`NavClient`]
//! to ask for paths, line of sight, ground heights and movement ticks; the
//! `client` binary wraps the same calls in a small probe CLI for operators.
//!
//! ## Connection Model
//!
//! One [`NavClient`] owns one TCP connection. Requests are written as
//! length-prefixed bincode frames and the server answers each one in order,
//! so a client is used from a single task at a time. Open several clients
//! for parallel work.
//!
//! ## Errors
//!
//! Server-side rejections come back as [`ClientError::Server`] carrying the
//! server's error kind. [`ClientError::is_not_ready`] singles out the
//! "still initializing" case so callers can retry once map data is resident,
//! or use [`NavClient::wait_until_ready`] up front.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::NavClient;
//! use shared::Point3D;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), client::ClientError> {
//! let mut nav = NavClient::connect("127.0.0.1:47500").await?;
//! nav.wait_until_ready(Duration::from_secs(30)).await?;
//! let path = nav
//!     .find_path(0, Point3D::new(0.0, 0.0, 0.0), Point3D::new(100.0, 0.0, 0.0), true)
//!     .await?;
//! println!("{} corners", path.corners.len());
//! # Ok(())
//! # }
//! ```

pub mod network;

pub use network::{ClientError, NavClient};

use shared::Point3D;

/// Parses `x,y,z` into a point. Used for command line coordinates.
pub fn parse_point(s: &str) -> Result<Point3D, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z but got '{}'", s));
    }

    let mut coords = [0.0f32; 3];
    for (slot, part) in coords.iter_mut().zip(&parts) {
        let value: f32 = part
            .parse()
            .map_err(|e| format!("invalid coordinate '{}': {}", part, e))?;
        if !value.is_finite() {
            return Err(format!("coordinate '{}' is not finite", part));
        }
        *slot = value;
    }
    Ok(Point3D::new(coords[0], coords[1], coords[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(
            parse_point("1.5, -2,30").unwrap(),
            Point3D::new(1.5, -2.0, 30.0)
        );
    }

    #[test]
    fn test_parse_point_rejects_bad_input() {
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,2,z").is_err());
        assert!(parse_point("1,2,NaN").is_err());
        assert!(parse_point("1,2,3,4").is_err());
    }
}
