//! Haar cascade object detector.
//!
//! Viola–Jones boosted cascade over OpenCV's cascade XML format
//! (`<opencv_storage><cascade>`, HAAR features, BOOST stages). Detection
//! scans an image pyramid with a fixed-size window, normalises each
//! window by its standard deviation, and merges overlapping hits.

use crate::imgproc;
use crate::types::Region;
use image::GrayImage;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: u32 = 3;
const GROUP_EPS: f64 = 0.2;
/// Past this pyramid factor the window moves one pixel at a time.
const FINE_STEP_FACTOR: f64 = 2.0;
/// Subtracted from every stage threshold on load, as OpenCV does.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cascade XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("scale factor must be greater than 1, got {0}")]
    InvalidScaleFactor(f64),
}

/// Multi-scale scan parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales (> 1).
    pub scale_factor: f64,
    /// Minimum cluster size, exclusive, for a grouped detection to survive.
    pub min_neighbors: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        }
    }
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
    tilted: bool,
}

/// Internal split node; non-positive children index into the leaves.
#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakTree {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    trees: Vec<WeakTree>,
}

/// A loaded Haar cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
    has_tilted: bool,
}

impl HaarCascade {
    /// Load a cascade definition from an OpenCV XML file.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            tilted = cascade.has_tilted,
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let root = parse_tree(xml)?;
        let cascade = root
            .child("opencv_storage")
            .and_then(|s| s.child("cascade"))
            .ok_or_else(|| {
                CascadeError::Unsupported(
                    "expected <opencv_storage><cascade> (legacy haar format is not supported)".into(),
                )
            })?;

        if let Some(kind) = cascade.child("featureType") {
            if !kind.text.trim().eq_ignore_ascii_case("HAAR") {
                return Err(CascadeError::Unsupported(format!(
                    "feature type {}",
                    kind.text.trim()
                )));
            }
        }
        if let Some(kind) = cascade.child("stageType") {
            if !kind.text.trim().eq_ignore_ascii_case("BOOST") {
                return Err(CascadeError::Unsupported(format!(
                    "stage type {}",
                    kind.text.trim()
                )));
            }
        }

        let window_width: u32 = parse_scalar(cascade.required("width")?)?;
        let window_height: u32 = parse_scalar(cascade.required("height")?)?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Malformed(format!(
                "window {window_width}x{window_height} is too small"
            )));
        }

        let features = cascade
            .required("features")?
            .items()
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;

        let stages = cascade
            .required("stages")?
            .items()
            .map(parse_stage)
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Malformed("cascade has no stages".into()));
        }

        let cascade = Self {
            window_width,
            window_height,
            has_tilted: features.iter().any(|f| f.tilted),
            stages,
            features,
        };
        cascade.validate()?;
        Ok(cascade)
    }

    /// Native detection window `(width, height)`.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Check every reference and rectangle so evaluation never indexes
    /// outside the window.
    fn validate(&self) -> Result<(), CascadeError> {
        let (ww, wh) = (self.window_width as i64, self.window_height as i64);

        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(CascadeError::Malformed(format!("feature {i} has no rects")));
            }
            for r in &feature.rects {
                let inside = if feature.tilted {
                    r.x - r.height >= 0
                        && r.x + r.width <= ww
                        && r.y >= 0
                        && r.y + r.width + r.height <= wh
                } else {
                    r.x >= 0 && r.y >= 0 && r.x + r.width <= ww && r.y + r.height <= wh
                };
                if r.width < 0 || r.height < 0 || !inside {
                    return Err(CascadeError::Malformed(format!(
                        "feature {i} rect ({} {} {} {}) leaves the {ww}x{wh} window",
                        r.x, r.y, r.width, r.height
                    )));
                }
            }
        }

        for (si, stage) in self.stages.iter().enumerate() {
            for tree in &stage.trees {
                for (ni, node) in tree.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(CascadeError::Malformed(format!(
                            "stage {si} references feature {} of {}",
                            node.feature,
                            self.features.len()
                        )));
                    }
                    for child in [node.left, node.right] {
                        // Children must point forward so evaluation terminates.
                        let ok = if child > 0 {
                            (child as usize) > ni && (child as usize) < tree.nodes.len()
                        } else {
                            ((-child) as usize) < tree.leaves.len()
                        };
                        if !ok {
                            return Err(CascadeError::Malformed(format!(
                                "stage {si} has a dangling tree reference {child}"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Detect objects at every scale and merge overlapping hits.
    ///
    /// Returned regions are in source image coordinates, in grouping order.
    pub fn detect_multi_scale(
        &self,
        image: &GrayImage,
        params: &DetectParams,
    ) -> Result<Vec<Region>, CascadeError> {
        if !(params.scale_factor > 1.0) {
            return Err(CascadeError::InvalidScaleFactor(params.scale_factor));
        }

        let (img_w, img_h) = image.dimensions();
        let (win_w, win_h) = (self.window_width, self.window_height);
        let mut candidates = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w <= win_w || scaled_h <= win_h {
                break;
            }

            let scaled = if scaled_w == img_w && scaled_h == img_h {
                image.clone()
            } else {
                imgproc::resize_bilinear(image, scaled_w, scaled_h)
            };
            let integral = IntegralImages::new(&scaled, self.has_tilted);

            let step = if factor > FINE_STEP_FACTOR { 1 } else { 2 };
            let found_w = (win_w as f64 * factor).round() as u32;
            let found_h = (win_h as f64 * factor).round() as u32;

            for y in (0..=scaled_h - win_h).step_by(step) {
                for x in (0..=scaled_w - win_w).step_by(step) {
                    if self.evaluate_window(&integral, x as usize, y as usize) {
                        candidates.push(Region::new(
                            (x as f64 * factor).round() as u32,
                            (y as f64 * factor).round() as u32,
                            found_w,
                            found_h,
                        ));
                    }
                }
            }

            factor *= params.scale_factor;
        }

        let grouped = group_rectangles(candidates, params.min_neighbors, GROUP_EPS);
        tracing::trace!(
            width = img_w,
            height = img_h,
            detections = grouped.len(),
            "cascade scan complete"
        );
        Ok(grouped)
    }

    /// Run every stage on the window at `(x, y)`; early reject on failure.
    fn evaluate_window(&self, integral: &IntegralImages, x: usize, y: usize) -> bool {
        let inv_norm = integral.inverse_std_dev(
            x + 1,
            y + 1,
            self.window_width as usize - 2,
            self.window_height as usize - 2,
        );

        for stage in &self.stages {
            let mut stage_sum = 0.0f64;
            for tree in &stage.trees {
                stage_sum += self.evaluate_tree(tree, integral, x, y, inv_norm);
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }

    fn evaluate_tree(
        &self,
        tree: &WeakTree,
        integral: &IntegralImages,
        x: usize,
        y: usize,
        inv_norm: f64,
    ) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &tree.nodes[idx as usize];
            let value = self.feature_value(&self.features[node.feature], integral, x, y) * inv_norm;
            idx = if value < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return tree.leaves[(-idx) as usize];
            }
        }
    }

    fn feature_value(&self, feature: &Feature, integral: &IntegralImages, x: usize, y: usize) -> f64 {
        feature
            .rects
            .iter()
            .map(|r| {
                let rx = x as i64 + r.x;
                let ry = y as i64 + r.y;
                let sum = if feature.tilted {
                    integral.tilted_sum(rx, ry, r.width, r.height)
                } else {
                    integral.rect_sum(rx as usize, ry as usize, r.width as usize, r.height as usize)
                };
                sum as f64 * r.weight
            })
            .sum()
    }
}

/// Summed-area tables for one pyramid level.
struct IntegralImages {
    /// Row stride, image width + 1.
    stride: usize,
    sum: Vec<i64>,
    sqsum: Vec<f64>,
    tilted: Option<Vec<i64>>,
}

impl IntegralImages {
    fn new(image: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let raw = image.as_raw();

        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sqsum = vec![0f64; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0i64;
            let mut row_sq = 0f64;
            for x in 0..w {
                let p = raw[y * w + x] as i64;
                row_sum += p;
                row_sq += (p * p) as f64;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sq;
            }
        }

        let tilted = with_tilted.then(|| tilted_integral(raw, w, h));

        Self {
            stride,
            sum,
            sqsum,
            tilted,
        }
    }

    fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        let s = self.stride;
        self.sum[(y + h) * s + x + w] + self.sum[y * s + x]
            - self.sum[(y + h) * s + x]
            - self.sum[y * s + x + w]
    }

    fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.stride;
        self.sqsum[(y + h) * s + x + w] + self.sqsum[y * s + x]
            - self.sqsum[(y + h) * s + x]
            - self.sqsum[y * s + x + w]
    }

    /// Sum over a 45° rotated rectangle anchored at its top corner.
    fn tilted_sum(&self, x: i64, y: i64, w: i64, h: i64) -> i64 {
        let Some(t) = &self.tilted else {
            return 0;
        };
        let s = self.stride as i64;
        let at = |cx: i64, cy: i64| t[(cy * s + cx) as usize];
        at(x, y) - at(x - h, y + h) - at(x + w, y + w) + at(x + w - h, y + w + h)
    }

    /// `1 / sqrt(area * Σp² - (Σp)²)` over the given rectangle, or 1 for
    /// flat windows.
    fn inverse_std_dev(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let area = (w * h) as f64;
        let s = self.rect_sum(x, y, w, h) as f64;
        let sq = self.rect_sqsum(x, y, w, h);
        let nf = area * sq - s * s;
        if nf > 0.0 {
            1.0 / nf.sqrt()
        } else {
            1.0
        }
    }
}

/// Rotated summed-area table, `(w + 1) × (h + 1)`:
/// `T(X, Y) = Σ p(x, y)` over `y < Y`, `|x - X + 1| <= Y - y - 1`.
///
/// Built with the four-term recurrence on a buffer padded wide enough that
/// every value read outside it is exactly zero.
fn tilted_integral(raw: &[u8], w: usize, h: usize) -> Vec<i64> {
    let pad = h + 2;
    let ext_w = w + 1 + 2 * pad;
    let mut ext = vec![0i64; ext_w * (h + 1)];

    let pixel = |x: i64, y: i64| -> i64 {
        if x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h {
            raw[y as usize * w + x as usize] as i64
        } else {
            0
        }
    };

    for yy in 1..=h {
        for col in 0..ext_w {
            let x = col as i64 - pad as i64;
            let y = yy as i64;
            let up_left = if col > 0 { ext[(yy - 1) * ext_w + col - 1] } else { 0 };
            let up_right = if col + 1 < ext_w {
                ext[(yy - 1) * ext_w + col + 1]
            } else {
                0
            };
            let up_up = if yy >= 2 { ext[(yy - 2) * ext_w + col] } else { 0 };
            ext[yy * ext_w + col] =
                up_left + up_right - up_up + pixel(x - 1, y - 1) + pixel(x - 1, y - 2);
        }
    }

    let stride = w + 1;
    let mut table = vec![0i64; stride * (h + 1)];
    for yy in 0..=h {
        let src = &ext[yy * ext_w + pad..yy * ext_w + pad + stride];
        table[yy * stride..(yy + 1) * stride].copy_from_slice(src);
    }
    table
}

/// Two rectangles are neighbours when every edge lies within
/// `eps * (min width + min height) / 2` of its counterpart.
fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster raw window hits and average each sufficiently large cluster.
///
/// Clusters with `<= min_neighbors` members are dropped, and a cluster
/// lying inside a stronger neighbour is discarded. With
/// `min_neighbors == 0` the hits are returned untouched.
fn group_rectangles(rects: Vec<Region>, min_neighbors: u32, eps: f64) -> Vec<Region> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Label clusters in order of first member.
    let mut labels: HashMap<usize, usize> = HashMap::new();
    let mut sums: Vec<[u64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let label = *labels.entry(root).or_insert_with(|| {
            sums.push([0; 4]);
            counts.push(0);
            sums.len() - 1
        });
        let acc = &mut sums[label];
        acc[0] += r.x as u64;
        acc[1] += r.y as u64;
        acc[2] += r.width as u64;
        acc[3] += r.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<Region> = sums
        .iter()
        .zip(&counts)
        .map(|(acc, &count)| {
            let inv = 1.0 / count as f64;
            let avg = |v: u64| (v as f64 * inv).round() as u32;
            Region::new(avg(acc[0]), avg(acc[1]), avg(acc[2]), avg(acc[3]))
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !swallowed {
            kept.push(*r1);
        }
    }

    kept
}

// --- XML plumbing ---

/// Minimal element tree; cascade files carry no meaningful attributes.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &str) -> Result<&XmlNode, CascadeError> {
        self.child(name).ok_or_else(|| {
            CascadeError::Malformed(format!("<{}> is missing <{name}>", self.name))
        })
    }

    /// Sequence entries, written as `<_>` elements.
    fn items(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter(|c| c.name == "_")
    }
}

fn parse_tree(xml: &str) -> Result<XmlNode, CascadeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack = vec![XmlNode::named(b"#document")];
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(XmlNode::named(e.name().as_ref())),
            Event::Empty(e) => {
                let node = XmlNode::named(e.name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(node) = stack.last_mut() {
                    if !node.text.is_empty() {
                        node.text.push(' ');
                    }
                    node.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| CascadeError::Malformed("unbalanced closing tag".into()))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| CascadeError::Malformed("unbalanced closing tag".into()))?;
                parent.children.push(node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(CascadeError::Malformed("unclosed element".into()));
    }
    stack
        .pop()
        .ok_or_else(|| CascadeError::Malformed("empty document".into()))
}

fn parse_scalar<T: std::str::FromStr>(node: &XmlNode) -> Result<T, CascadeError> {
    node.text.trim().parse().map_err(|_| {
        CascadeError::Malformed(format!("<{}> is not a number: {:?}", node.name, node.text))
    })
}

fn parse_numbers(node: &XmlNode) -> Result<Vec<f64>, CascadeError> {
    node.text
        .split_ascii_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| {
                CascadeError::Malformed(format!("<{}> has a bad number {tok:?}", node.name))
            })
        })
        .collect()
}

fn parse_feature(node: &XmlNode) -> Result<Feature, CascadeError> {
    let rects = node
        .required("rects")?
        .items()
        .map(|r| {
            let v = parse_numbers(r)?;
            if v.len() != 5 {
                return Err(CascadeError::Malformed(format!(
                    "rect needs 5 values, got {}",
                    v.len()
                )));
            }
            Ok(WeightedRect {
                x: v[0] as i64,
                y: v[1] as i64,
                width: v[2] as i64,
                height: v[3] as i64,
                weight: v[4],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tilted = match node.child("tilted") {
        Some(t) => parse_scalar::<i32>(t)? != 0,
        None => false,
    };

    Ok(Feature { rects, tilted })
}

fn parse_stage(node: &XmlNode) -> Result<Stage, CascadeError> {
    let threshold = parse_scalar::<f64>(node.required("stageThreshold")?)? - STAGE_THRESHOLD_EPS;
    let trees = node
        .required("weakClassifiers")?
        .items()
        .map(parse_tree_classifier)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage { threshold, trees })
}

fn parse_tree_classifier(node: &XmlNode) -> Result<WeakTree, CascadeError> {
    let raw = parse_numbers(node.required("internalNodes")?)?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Malformed(format!(
            "internalNodes needs groups of 4 values, got {}",
            raw.len()
        )));
    }
    let nodes = raw
        .chunks_exact(4)
        .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();
    let leaves = parse_numbers(node.required("leafValues")?)?;
    Ok(WeakTree { nodes, leaves })
}
