pub const MRMS_BASE_URL: &str = "https://mrms.ncep.noaa.gov/data/2D/ReflectivityAtLowestAltitude/";
pub const MRMS_PRODUCT_PREFIX: &str = "MRMS_ReflectivityAtLowestAltitude";
pub const MRMS_LEVEL_TAG: &str = "00.50";
pub const MRMS_FILE_SUFFIX: &str = ".grib2.gz";
pub const MRMS_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub const PRIMARY_SOURCE_LABEL: &str = "NOAA MRMS";
pub const SECONDARY_SOURCE_LABEL: &str = "Iowa Environmental Mesonet";
pub const SECONDARY_TILE_URL: &str =
    "https://mesonet.agron.iastate.edu/cache/tile.py/1.0.0/nexrad-n0q-900913/{z}/{x}/{y}.png";
pub const COVERAGE_LABEL: &str = "CONUS";

// Fixed CONUS extent. Payloads are never decoded far enough to read the grid.
pub const CONUS_NORTH_DEG: f64 = 50.0;
pub const CONUS_SOUTH_DEG: f64 = 20.0;
pub const CONUS_EAST_DEG: f64 = -60.0;
pub const CONUS_WEST_DEG: f64 = -130.0;

pub const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
pub const GRIB_MAGIC: &[u8; 4] = b"GRIB";
pub const GRIB_EDITION_OFFSET: usize = 7;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3001";
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_PROBE_STEP_SECONDS: u64 = 120;
pub const DEFAULT_PROBE_WINDOW_SECONDS: u64 = 3600;
pub const MAX_PROBE_WINDOW_SECONDS: u64 = 24 * 3600;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3001";
pub const RADAR_DATA_PATH: &str = "/api/radar-data";
pub const REFRESH_RADAR_EVENT: &str = "refresh-radar";
pub const DISPLAY_REFRESH_INTERVAL_SECONDS: u64 = 120;
pub const DISPLAY_CLOCK_TICK_SECONDS: u64 = 1;
pub const EVENT_BUS_CAPACITY: usize = 16;
