//! Earth-related constants and the central-body gravitation model
//!
//! Positions handed to this module are Cartesian vectors in an Earth-centered frame (meters).
//! Gravitation is modeled as an inverse-square point mass:
//!
//! $$
//! g(p) = -\frac{\mu}{\|p\|^3} p
//! $$
//!
//! where $\mu$ is the standard gravitational parameter. This ignores oblateness ($J_2$) and Earth
//! rotation, which is acceptable for the short, single-step propagation this crate performs. The
//! model is undefined at the origin; [`gravitation`] reports that case as
//! [`NavError::SingularGeometry`] and leaves the recovery policy to the caller.
use nalgebra::Vector3;

use crate::errors::{NavError, Result};

// Earth constants (WGS84)
/// Earth's standard gravitational parameter ($\mu = GM$) in $m^3/s^2$
pub const GM: f64 = 3.986004418e14;
/// Earth's equitorial radius in meters
pub const EQUATORIAL_RADIUS: f64 = 6378137.0; // meters
/// Earth's polar radius in meters
pub const POLAR_RADIUS: f64 = 6356752.31425; // meters
/// Earth's mean radius in meters
pub const MEAN_RADIUS: f64 = 6371000.0; // meters
/// Earth's gravitational acceleration at the equator ($g_e$) in $m/s^2$
pub const GE: f64 = 9.7803253359; // m/s^2, equatorial radius

/// Gravitational acceleration at `position` for a central body with parameter `gm`.
///
/// # Arguments
/// * `position` - Earth-centered position vector in meters.
/// * `gm` - Standard gravitational parameter in $m^3/s^2$ (usually [`GM`]).
///
/// # Returns
/// * The acceleration vector in $m/s^2$, pointing towards the origin.
/// * [`NavError::SingularGeometry`] if `position` has zero magnitude or is so close to the origin
///   that the result is not finite.
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use navmerge::earth;
/// let g = earth::gravitation(&Vector3::new(earth::EQUATORIAL_RADIUS, 0.0, 0.0), earth::GM).unwrap();
/// assert!(g[0] < -9.7 && g[0] > -9.9);
/// ```
pub fn gravitation(position: &Vector3<f64>, gm: f64) -> Result<Vector3<f64>> {
    let radius = position.norm();
    if radius == 0.0 {
        return Err(NavError::SingularGeometry);
    }
    let g = -gm * position / radius.powi(3);
    if g.iter().all(|c| c.is_finite()) {
        Ok(g)
    } else {
        Err(NavError::SingularGeometry)
    }
}
