//! Condon (1997) analytic parameter-uncertainty estimation.

/// 1-sigma uncertainties for a single fitted component, in report-ready
/// units (degrees for position, arcsec for shape, Jy for flux).
#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentErrors {
    pub err_peak_flux: f64,
    pub err_major_arcsec: f64,
    pub err_minor_arcsec: f64,
    pub err_ra_deg: f64,
    pub err_dec_deg: f64,
    /// `-1.0` when major/minor are too similar to constrain a position angle.
    pub err_pa_deg: f64,
    pub err_int_flux: f64,
}

/// Estimates errors per Condon (1997) for a fitted elliptical Gaussian.
///
/// `major_arcsec`/`minor_arcsec` are the fitted FWHM axes in arcsec,
/// `pa_deg` the position angle in degrees, `peak_flux`/`local_rms` in
/// Jy/beam, `int_flux` in Jy, and `beam_area_deg2` the synthesized beam area
/// at the component's sky position.
pub fn condon_errors(
    major_arcsec: f64,
    minor_arcsec: f64,
    pa_deg: f64,
    peak_flux: f64,
    local_rms: f64,
    int_flux: f64,
    beam_area_deg2: f64,
) -> ComponentErrors {
    const ALPHA_AMP: (f64, f64) = (1.5, 1.5);
    const ALPHA_MAJOR_XO: (f64, f64) = (2.5, 0.5);
    const ALPHA_MINOR_YO_PA: (f64, f64) = (0.5, 2.5);

    let major_deg = major_arcsec / 3600.0;
    let minor_deg = minor_arcsec / 3600.0;
    let phi = pa_deg.to_radians();

    let theta_n = (beam_area_deg2 / std::f64::consts::PI).sqrt();
    let smoothing = major_deg * minor_deg / (theta_n * theta_n);
    let factor1 = 1.0 + major_deg / theta_n;
    let factor2 = 1.0 + minor_deg / theta_n;
    let snr = peak_flux / local_rms;

    let rho2 = |alpha: (f64, f64)| -> f64 {
        smoothing / 4.0 * factor1.powf(alpha.0) * factor2.powf(alpha.1) * snr * snr
    };

    let err_peak_flux = peak_flux * (2.0 / rho2(ALPHA_AMP)).sqrt();
    let err_major_deg = major_deg * (2.0 / rho2(ALPHA_MAJOR_XO)).sqrt();
    let err_minor_deg = minor_deg * (2.0 / rho2(ALPHA_MINOR_YO_PA)).sqrt();

    let err_xo2 = 2.0 / rho2(ALPHA_MAJOR_XO) * major_deg * major_deg / (8.0 * std::f64::consts::LN_2);
    let err_yo2 = 2.0 / rho2(ALPHA_MINOR_YO_PA) * minor_deg * minor_deg / (8.0 * std::f64::consts::LN_2);
    let err_ra_deg = (err_xo2 * phi.sin().powi(2) + err_yo2 * phi.cos().powi(2)).sqrt();
    let err_dec_deg = (err_xo2 * phi.cos().powi(2) + err_yo2 * phi.sin().powi(2)).sqrt();

    let ratio = major_deg / minor_deg;
    let err_pa_deg = if (ratio.powi(2) + (1.0 / ratio).powi(2) - 2.0).abs() < 0.01 {
        -1.0
    } else {
        ((4.0 / rho2(ALPHA_MINOR_YO_PA)).sqrt()
            * (major_deg * minor_deg / (major_deg.powi(2) - minor_deg.powi(2))))
        .to_degrees()
    };

    let mut err2 = (err_peak_flux / peak_flux).powi(2);
    err2 += (theta_n * theta_n / (major_deg * minor_deg))
        * ((err_major_deg / major_deg).powi(2) + (err_minor_deg / minor_deg).powi(2));
    let err_int_flux = int_flux * err2.sqrt();

    ComponentErrors {
        err_peak_flux,
        err_major_arcsec: err_major_deg * 3600.0,
        err_minor_arcsec: err_minor_deg * 3600.0,
        err_ra_deg,
        err_dec_deg,
        err_pa_deg,
        err_int_flux,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn circular_beam_gives_indeterminate_pa_error() {
        let errs = condon_errors(10.0, 10.0, 0.0, 1.0, 0.01, 1.2, 1e-4);
        assert_relative_eq!(errs.err_pa_deg, -1.0);
    }

    #[test]
    fn higher_snr_gives_smaller_errors() {
        let low_snr = condon_errors(10.0, 5.0, 30.0, 1.0, 0.1, 1.2, 1e-4);
        let high_snr = condon_errors(10.0, 5.0, 30.0, 1.0, 0.001, 1.2, 1e-4);
        assert!(high_snr.err_peak_flux < low_snr.err_peak_flux);
    }
}
