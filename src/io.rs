use anyhow::{Result, bail};
use geo::Point;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::geo_utils::haversine_distance_meters;
use crate::survey::{Survey, SurveyBatch, SurveyData, SurveyImage, TracePoint};

pub(crate) mod survey_file {
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Serialize};

    use crate::survey::{SurveyData, SurveyImage};

    #[derive(Debug, Serialize, Deserialize, Clone)]
    pub struct SurveyFile {
        pub title: String,

        #[serde(rename = "surveyedAt")]
        pub surveyed_at: DateTime<FixedOffset>,

        pub trace: Vec<TraceSample>,

        #[serde(default)]
        pub measurements: Vec<MeasurementEntry>,

        #[serde(default)]
        pub images: Vec<ImageEntry>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone)]
    pub struct TraceSample {
        pub lat: f64,
        pub lon: f64,

        /// Meters from the survey start, derived from the trace when absent
        #[serde(default)]
        pub distance: Option<f64>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone)]
    pub struct MeasurementEntry {
        pub distance: f64,

        #[serde(rename = "type")]
        pub kind: String,

        pub value: f64,
    }

    #[derive(Debug, Serialize, Deserialize, Clone)]
    pub struct ImageEntry {
        pub distance: f64,

        #[serde(rename = "fileName")]
        pub file_name: String,
    }

    impl From<&MeasurementEntry> for SurveyData {
        fn from(val: &MeasurementEntry) -> Self {
            SurveyData {
                distance_survey: val.distance,
                kind: val.kind.clone(),
                value: val.value,
                tag: None,
            }
        }
    }

    impl From<&ImageEntry> for SurveyImage {
        fn from(val: &ImageEntry) -> Self {
            SurveyImage {
                distance_survey: val.distance,
                file_name: val.file_name.clone(),
                tag: None,
            }
        }
    }
}

use survey_file::{SurveyFile, TraceSample};

/// Read a survey file, returning the survey and its data sorted by distance
pub async fn load_survey(path: impl AsRef<Path>) -> Result<(Survey, SurveyBatch)> {
    let mut file = File::open(path.as_ref()).await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;

    let parsed: SurveyFile = serde_json::from_slice(&contents)?;
    survey_from_file(parsed)
}

pub(crate) fn survey_from_file(file: SurveyFile) -> Result<(Survey, SurveyBatch)> {
    let trace = trace_points(&file.trace)?;

    let mut batch = SurveyBatch {
        measurements: file.measurements.iter().map(SurveyData::from).collect(),
        images: file.images.iter().map(SurveyImage::from).collect(),
    };
    batch.sort_by_distance();

    Ok((Survey::new(file.title, file.surveyed_at, trace), batch))
}

/// Fill missing sample distances with the cumulative haversine length
fn trace_points(samples: &[TraceSample]) -> Result<Vec<TracePoint>> {
    let mut points: Vec<TracePoint> = Vec::with_capacity(samples.len());

    for (i, sample) in samples.iter().enumerate() {
        let coordinate = Point::new(sample.lon, sample.lat);
        let distance = match (sample.distance, points.last()) {
            (Some(distance), _) => distance,
            (None, Some(previous)) => {
                previous.distance_survey + haversine_distance_meters(previous.coordinate, coordinate)
            }
            (None, None) => 0.0,
        };

        if let Some(previous) = points.last() {
            if distance < previous.distance_survey {
                bail!(
                    "trace sample {} goes back from {:.1}m to {:.1}m",
                    i,
                    previous.distance_survey,
                    distance
                );
            }
        }

        points.push(TracePoint {
            distance_survey: distance,
            coordinate,
        });
    }

    Ok(points)
}
