use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::column_task::ColumnTask;
use crate::coordinates::{lon_lat_to_tile, MAX_ZOOM};
use crate::error::InvalidRequest;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        BoundingBox {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidRequest> {
        let coords = [self.min_lng, self.min_lat, self.max_lng, self.max_lat];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(InvalidRequest::new("bounding box coordinates must be finite"));
        }
        for lng in [self.min_lng, self.max_lng] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(InvalidRequest::new(format!(
                    "longitude {} is outside [-180, 180]",
                    lng
                )));
            }
        }
        for lat in [self.min_lat, self.max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(InvalidRequest::new(format!(
                    "latitude {} is outside [-90, 90]",
                    lat
                )));
            }
        }
        if self.min_lng > self.max_lng || self.min_lat > self.max_lat {
            return Err(InvalidRequest::new(
                "the north-east corner must be greater than the south-west corner in both longitude and latitude",
            ));
        }
        Ok(())
    }
}

/// Everything a single run needs to know. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub zooms: Vec<u8>,
    pub bbox: BoundingBox,
    pub target_dir: PathBuf,
    pub overwrite: bool,
}

impl DownloadRequest {
    /// Sorted, de-duplicated zoom levels after validation.
    pub fn validated_zooms(&self) -> Result<Vec<u8>, InvalidRequest> {
        self.bbox.validate()?;
        if self.zooms.is_empty() {
            return Err(InvalidRequest::new("at least one zoom level is required"));
        }
        if let Some(zoom) = self.zooms.iter().find(|&&z| z > MAX_ZOOM) {
            return Err(InvalidRequest::new(format!(
                "zoom level {} exceeds the maximum of {}",
                zoom, MAX_ZOOM
            )));
        }
        let zooms: BTreeSet<u8> = self.zooms.iter().copied().collect();
        Ok(zooms.into_iter().collect())
    }
}

/// Inclusive row and column ranges covering a bounding box at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileGrid {
    pub zoom: u8,
    pub row_min: u32,
    pub row_max: u32,
    pub col_min: u32,
    pub col_max: u32,
}

impl TileGrid {
    pub fn tile_count(&self) -> u64 {
        let rows = (self.row_max - self.row_min + 1) as u64;
        let cols = (self.col_max - self.col_min + 1) as u64;
        rows * cols
    }
}

pub fn plan_grid(zoom: u8, bbox: &BoundingBox) -> Result<TileGrid, InvalidRequest> {
    bbox.validate()?;
    // Rows grow southwards, so the northern edge gives the smallest row.
    let (col_min, row_min) = lon_lat_to_tile(zoom, bbox.min_lng, bbox.max_lat);
    let (col_max, row_max) = lon_lat_to_tile(zoom, bbox.max_lng, bbox.min_lat);
    Ok(TileGrid {
        zoom,
        row_min,
        row_max,
        col_min,
        col_max,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub grids: Vec<TileGrid>,
    pub expected_total: u64,
}

impl Plan {
    pub fn new(request: &DownloadRequest) -> Result<Plan> {
        let grids = request
            .validated_zooms()?
            .into_iter()
            .map(|zoom| plan_grid(zoom, &request.bbox))
            .collect::<Result<Vec<TileGrid>, InvalidRequest>>()?;
        let expected_total = grids.iter().map(TileGrid::tile_count).sum();
        Ok(Plan {
            grids,
            expected_total,
        })
    }

    /// One task per column per zoom level.
    pub fn column_tasks(&self) -> Vec<ColumnTask> {
        self.grids
            .iter()
            .flat_map(|grid| {
                (grid.col_min..=grid.col_max).map(move |col| ColumnTask {
                    zoom: grid.zoom,
                    col,
                    row_min: grid.row_min,
                    row_max: grid.row_max,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(zooms: Vec<u8>, bbox: BoundingBox) -> DownloadRequest {
        DownloadRequest {
            zooms,
            bbox,
            target_dir: PathBuf::from("tiles"),
            overwrite: false,
        }
    }

    #[test]
    fn beijing_at_zoom_6_is_one_tile() {
        let grid = plan_grid(6, &BoundingBox::new(116.3, 39.9, 116.4, 40.0)).unwrap();
        assert_eq!(
            grid,
            TileGrid {
                zoom: 6,
                row_min: 24,
                row_max: 24,
                col_min: 52,
                col_max: 52
            }
        );
    }

    #[test]
    fn expected_total_sums_every_zoom_level() {
        let bbox = BoundingBox::new(73.0, 18.0, 135.0, 53.0);
        let plan = Plan::new(&request(vec![4, 5, 6], bbox)).unwrap();

        let by_hand: u64 = plan
            .grids
            .iter()
            .map(|g| ((g.row_max - g.row_min + 1) * (g.col_max - g.col_min + 1)) as u64)
            .sum();
        assert_eq!(plan.expected_total, by_hand);
        assert_eq!(plan.grids.len(), 3);

        let task_tiles: u64 = plan
            .column_tasks()
            .iter()
            .map(|t| (t.row_max - t.row_min + 1) as u64)
            .sum();
        assert_eq!(task_tiles, plan.expected_total);
    }

    #[test]
    fn whole_world_at_zoom_2_is_sixteen_tiles() {
        let bbox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
        let plan = Plan::new(&request(vec![2], bbox)).unwrap();
        assert_eq!(plan.expected_total, 16);
        assert_eq!(plan.column_tasks().len(), 4);
    }

    #[test]
    fn duplicate_zooms_are_planned_once() {
        let bbox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
        let plan = Plan::new(&request(vec![1, 1, 0], bbox)).unwrap();
        assert_eq!(plan.grids.iter().map(|g| g.zoom).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(plan.expected_total, 5);
    }

    #[test]
    fn inverted_bbox_is_invalid() {
        let err = Plan::new(&request(vec![6], BoundingBox::new(116.4, 39.9, 116.3, 40.0)))
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidRequest>().is_some());

        let err = plan_grid(6, &BoundingBox::new(116.3, 40.0, 116.4, 39.9)).unwrap_err();
        assert!(err.reason.contains("north-east"));
    }

    #[test]
    fn out_of_range_inputs_are_invalid() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        for zooms in [vec![], vec![MAX_ZOOM + 1]] {
            let err = Plan::new(&request(zooms, bbox)).unwrap_err();
            assert!(err.downcast_ref::<InvalidRequest>().is_some());
        }
        let err = Plan::new(&request(vec![3], BoundingBox::new(-200.0, 0.0, 1.0, 1.0)))
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidRequest>().is_some());
        let err = Plan::new(&request(vec![3], BoundingBox::new(0.0, f64::NAN, 1.0, 1.0)))
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidRequest>().is_some());
    }
}
