use ndarray::{Array2, Axis};

use crate::RawEEG;
use crate::config::ReferenceType;

/// Subtracts the across-channel mean from every sample.
pub fn compute_average_reference(data: &Array2<f64>) -> Array2<f64> {
    if data.is_empty() {
        return data.clone();
    }
    let Some(average) = data.mean_axis(Axis(0)) else {
        return data.clone();
    };
    data - &average.insert_axis(Axis(0))
}

pub fn apply_reference(raw: &RawEEG, reference: ReferenceType) -> RawEEG {
    match reference {
        ReferenceType::Original => raw.clone(),
        ReferenceType::AverageReference => {
            log::info!("Applying average reference over {} channels", raw.info.num_ch());
            raw.with_data(compute_average_reference(&raw.data))
        }
    }
}
