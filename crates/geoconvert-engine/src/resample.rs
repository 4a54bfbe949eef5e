//! Resampling policy for raster reprojection.
//!
//! Interpolating kernels invent values between neighbouring cells. That is
//! right for measurements (elevation, temperature) and wrong for class
//! codes (land cover, zoning), where a blended `3.5` is not a class.

use geoconvert_core::{BandInfo, ConvertError, ConvertResult, DataClass, Resampling};

/// Reject explicit kernels that would corrupt categorical data.
///
/// Runs before staging so a bad combination costs no engine call.
pub fn check_request(explicit: Option<Resampling>, class: Option<DataClass>) -> ConvertResult<()> {
    match (explicit, class) {
        (Some(r), Some(DataClass::Categorical)) if r.interpolates() => {
            Err(ConvertError::invalid_input(format!(
                "resampling method '{r}' interpolates and would corrupt categorical data; use 'near' or 'mode'"
            )))
        }
        _ => Ok(()),
    }
}

/// Classify raster bands: integer types or colour tables mean class codes.
pub fn classify_bands(bands: &[BandInfo]) -> DataClass {
    let categorical = bands.is_empty()
        || bands.iter().any(|b| b.is_integer() || b.has_color_table);
    if categorical {
        DataClass::Categorical
    } else {
        DataClass::Continuous
    }
}

/// Pick the kernel for a reprojection.
///
/// Precedence: explicit request, then declared data class, then the band
/// types reported by the engine. With nothing to go on, nearest-neighbour
/// is used because it never invents values.
pub fn choose_resampling(
    explicit: Option<Resampling>,
    class: Option<DataClass>,
    bands: &[BandInfo],
) -> ConvertResult<Resampling> {
    check_request(explicit, class)?;
    if let Some(r) = explicit {
        return Ok(r);
    }
    let class = class.unwrap_or_else(|| classify_bands(bands));
    Ok(match class {
        DataClass::Categorical => Resampling::Nearest,
        DataClass::Continuous => Resampling::Bilinear,
    })
}
