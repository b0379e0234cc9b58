//! Fixed landmark vocabularies and skeleton edges for every detector variant.
//!
//! Order matters: position `i` reported by a model always maps to entry `i`.

use std::sync::LazyLock;

pub const HAND_LANDMARK_COUNT: usize = 21;
pub const FACE_LANDMARK_COUNT: usize = 478;
pub const POSE_LANDMARK_COUNT: usize = 33;

pub const HAND_LANDMARK_NAMES: [&str; HAND_LANDMARK_COUNT] = [
    "WRIST",
    "THUMB_CMC",
    "THUMB_MCP",
    "THUMB_IP",
    "THUMB_TIP",
    "INDEX_FINGER_MCP",
    "INDEX_FINGER_PIP",
    "INDEX_FINGER_DIP",
    "INDEX_FINGER_TIP",
    "MIDDLE_FINGER_MCP",
    "MIDDLE_FINGER_PIP",
    "MIDDLE_FINGER_DIP",
    "MIDDLE_FINGER_TIP",
    "RING_FINGER_MCP",
    "RING_FINGER_PIP",
    "RING_FINGER_DIP",
    "RING_FINGER_TIP",
    "PINKY_MCP",
    "PINKY_PIP",
    "PINKY_DIP",
    "PINKY_TIP",
];

pub const POSE_LANDMARK_NAMES: [&str; POSE_LANDMARK_COUNT] = [
    "NOSE",
    "LEFT_EYE_INNER",
    "LEFT_EYE",
    "LEFT_EYE_OUTER",
    "RIGHT_EYE_INNER",
    "RIGHT_EYE",
    "RIGHT_EYE_OUTER",
    "LEFT_EAR",
    "RIGHT_EAR",
    "MOUTH_LEFT",
    "MOUTH_RIGHT",
    "LEFT_SHOULDER",
    "RIGHT_SHOULDER",
    "LEFT_ELBOW",
    "RIGHT_ELBOW",
    "LEFT_WRIST",
    "RIGHT_WRIST",
    "LEFT_PINKY",
    "RIGHT_PINKY",
    "LEFT_INDEX",
    "RIGHT_INDEX",
    "LEFT_THUMB",
    "RIGHT_THUMB",
    "LEFT_HIP",
    "RIGHT_HIP",
    "LEFT_KNEE",
    "RIGHT_KNEE",
    "LEFT_ANKLE",
    "RIGHT_ANKLE",
    "LEFT_HEEL",
    "RIGHT_HEEL",
    "LEFT_FOOT_INDEX",
    "RIGHT_FOOT_INDEX",
];

/// Face mesh points are numbered rather than named: `"0"` through `"477"`.
pub static FACE_LANDMARK_NAMES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    (0..FACE_LANDMARK_COUNT)
        .map(|i| -> &'static str { i.to_string().leak() })
        .collect()
});

pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    // palm
    (0, 1),
    (0, 5),
    (5, 9),
    (9, 13),
    (13, 17),
    (0, 17),
    // thumb
    (1, 2),
    (2, 3),
    (3, 4),
    // index
    (5, 6),
    (6, 7),
    (7, 8),
    // middle
    (9, 10),
    (10, 11),
    (11, 12),
    // ring
    (13, 14),
    (14, 15),
    (15, 16),
    // pinky
    (17, 18),
    (18, 19),
    (19, 20),
];

pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109, 10,
];
const LIPS_OUTER_LOWER: &[usize] = &[61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
const LIPS_OUTER_UPPER: &[usize] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
const LIPS_INNER_LOWER: &[usize] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];
const LIPS_INNER_UPPER: &[usize] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
const LEFT_EYE_LOWER: &[usize] = &[263, 249, 390, 373, 374, 380, 381, 382, 362];
const LEFT_EYE_UPPER: &[usize] = &[263, 466, 388, 387, 386, 385, 384, 398, 362];
const LEFT_EYEBROW_LOWER: &[usize] = &[276, 283, 282, 295, 285];
const LEFT_EYEBROW_UPPER: &[usize] = &[300, 293, 334, 296, 336];
const RIGHT_EYE_LOWER: &[usize] = &[33, 7, 163, 144, 145, 153, 154, 155, 133];
const RIGHT_EYE_UPPER: &[usize] = &[33, 246, 161, 160, 159, 158, 157, 173, 133];
const RIGHT_EYEBROW_LOWER: &[usize] = &[46, 53, 52, 65, 55];
const RIGHT_EYEBROW_UPPER: &[usize] = &[70, 63, 105, 66, 107];
const LEFT_IRIS: &[usize] = &[474, 475, 476, 477, 474];
const RIGHT_IRIS: &[usize] = &[469, 470, 471, 472, 469];

const FACE_CONTOURS: [&[usize]; 15] = [
    FACE_OVAL,
    LIPS_OUTER_LOWER,
    LIPS_OUTER_UPPER,
    LIPS_INNER_LOWER,
    LIPS_INNER_UPPER,
    LEFT_EYE_LOWER,
    LEFT_EYE_UPPER,
    LEFT_EYEBROW_LOWER,
    LEFT_EYEBROW_UPPER,
    RIGHT_EYE_LOWER,
    RIGHT_EYE_UPPER,
    RIGHT_EYEBROW_LOWER,
    RIGHT_EYEBROW_UPPER,
    LEFT_IRIS,
    RIGHT_IRIS,
];

/// Face contour polylines flattened into consecutive-point edges.
pub static FACE_CONNECTIONS: LazyLock<Vec<(usize, usize)>> = LazyLock::new(|| {
    FACE_CONTOURS
        .iter()
        .flat_map(|line| line.windows(2).map(|pair| (pair[0], pair[1])))
        .collect()
});
